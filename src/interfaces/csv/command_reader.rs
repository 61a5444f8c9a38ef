use crate::error::{LifecycleError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Operations understood by the command journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Registers an infraction type: `ref` is the code, `target` the category, `text` the label.
    Type,
    Infraction,
    Validate,
    ContestInfraction,
    Reinstate,
    CancelInfraction,
    Archive,
    Unarchive,
    /// Issues a ticket over the `;`-separated infraction refs in `target`.
    Ticket,
    Pay,
    Majorer,
    Late,
    Contest,
    Ruling,
    Cancel,
    Remind,
    /// Opens a pending payment on the ticket named by `target`.
    Payment,
    Confirm,
    Refuse,
    Refund,
    Receipt,
    Appeal,
    Assign,
    Decide,
    Abandon,
}

/// One line of the journal (`op,ref,target,amount,points,measured,limit,flag,text`).
///
/// `ref` is a label local to the journal; later lines refer to the entity created under it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: Op,
    #[serde(rename = "ref")]
    pub reference: String,
    pub target: Option<String>,
    pub amount: Option<Decimal>,
    pub points: Option<u32>,
    pub measured: Option<Decimal>,
    pub limit: Option<Decimal>,
    pub flag: Option<bool>,
    pub text: Option<String>,
}

impl CommandRecord {
    pub fn target(&self) -> Result<&str> {
        self.target
            .as_deref()
            .ok_or_else(|| self.missing("target"))
    }

    pub fn amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| self.missing("amount"))
    }

    pub fn text_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.text.as_deref().unwrap_or(default)
    }

    fn missing(&self, field: &str) -> LifecycleError {
        LifecycleError::validation(format!(
            "{:?} {} requires a {field}",
            self.op, self.reference
        ))
    }
}

/// Reads journal commands from a CSV source.
///
/// Whitespace is trimmed and short lines are accepted; trailing columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the journal, one `Result` per line.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LifecycleError::from))
    }
}
