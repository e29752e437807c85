//! Display templates for the string a ticker publishes.
//!
//! A template is literal text with `{placeholder}` fields. `{{` and `}}`
//! produce literal braces. Templates are parsed once when a ticker is
//! validated, so rendering can't fail at runtime.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::PriceQuote;

/// Template used when a ticker doesn't specify one
pub const DEFAULT_TEMPLATE: &str = "{symbol} {price}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unclosed '{{' at position {0}")]
    Unclosed(usize),

    #[error("unmatched '}}' at position {0}")]
    Unmatched(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Symbol,
    Price,
    Change,
    ChangePct,
    Arrow,
    Currency,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "symbol" => Some(Self::Symbol),
            "price" => Some(Self::Price),
            "change" => Some(Self::Change),
            "change_pct" => Some(Self::ChangePct),
            "arrow" => Some(Self::Arrow),
            "currency" => Some(Self::Currency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A parsed display template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl DisplayTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        if raw.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, n) in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(pos));
                    }
                    let field = Placeholder::parse(name.trim())
                        .ok_or_else(|| TemplateError::UnknownPlaceholder(name.clone()))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(TemplateError::Unmatched(pos)),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template text as it was submitted
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Render the display string for a quote
    pub fn render(&self, symbol: &str, quote: &PriceQuote, decimals: u32) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Placeholder::Symbol) => out.push_str(symbol),
                Segment::Field(Placeholder::Price) => {
                    out.push_str(&fixed(quote.price, decimals));
                }
                Segment::Field(Placeholder::Change) => {
                    if let Some(change) = quote.change {
                        out.push_str(&signed(change, decimals));
                    }
                }
                Segment::Field(Placeholder::ChangePct) => {
                    if let Some(pct) = quote.change_pct {
                        out.push_str(&signed(pct, 2));
                        out.push('%');
                    }
                }
                Segment::Field(Placeholder::Arrow) => {
                    let direction = quote.change.or(quote.change_pct);
                    match direction {
                        Some(d) if d > Decimal::ZERO => out.push('⬈'),
                        Some(d) if d < Decimal::ZERO => out.push('⬊'),
                        Some(_) => out.push('→'),
                        None => {}
                    }
                }
                Segment::Field(Placeholder::Currency) => {
                    if let Some(currency) = &quote.currency {
                        out.push_str(&currency.to_uppercase());
                    }
                }
            }
        }
        out.trim().to_string()
    }
}

impl Default for DisplayTemplate {
    fn default() -> Self {
        Self {
            raw: DEFAULT_TEMPLATE.to_string(),
            segments: vec![
                Segment::Field(Placeholder::Symbol),
                Segment::Literal(" ".to_string()),
                Segment::Field(Placeholder::Price),
            ],
        }
    }
}

fn fixed(value: Decimal, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value.round_dp(decimals))
}

fn signed(value: Decimal, decimals: u32) -> String {
    if value >= Decimal::ZERO {
        format!("+{}", fixed(value, decimals))
    } else {
        fixed(value, decimals)
    }
}
