use crate::domain::ticket::Ticket;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

/// One output row of the final ticket summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketSummary {
    pub ticket: String,
    pub numero_pv: String,
    pub statut: String,
    pub montant_du: String,
    pub montant_paye: String,
    pub montant_restant: String,
}

impl TicketSummary {
    /// Summarises `ticket` as of `now`; `label` is the journal reference it was issued under.
    pub fn of(label: impl Into<String>, ticket: &Ticket, now: DateTime<Utc>) -> Self {
        Self {
            ticket: label.into(),
            numero_pv: ticket.numero_pv.clone(),
            statut: ticket.statut.to_string(),
            montant_du: ticket.amount_due(now).to_string(),
            montant_paye: ticket.montant_paye.to_string(),
            montant_restant: ticket.remaining(now).to_string(),
        }
    }
}

pub struct TicketWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TicketWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_tickets(&mut self, tickets: impl IntoIterator<Item = TicketSummary>) -> Result<()> {
        for summary in tickets {
            self.writer.serialize(summary)?;
        }
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(label: &str) -> TicketSummary {
        TicketSummary {
            ticket: label.to_string(),
            numero_pv: "PV-20250101-0001".to_string(),
            statut: "EMIS".to_string(),
            montant_du: "202.5".to_string(),
            montant_paye: "0".to_string(),
            montant_restant: "202.5".to_string(),
        }
    }

    #[test]
    fn test_writes_header_and_rows() {
        let mut buffer = Vec::new();
        TicketWriter::new(&mut buffer)
            .write_tickets([summary("T1"), summary("T2")])
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines[0],
            "ticket,numero_pv,statut,montant_du,montant_paye,montant_restant"
        );
        assert_eq!(lines[1], "T1,PV-20250101-0001,EMIS,202.5,0,202.5");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_output_has_no_header() {
        let mut buffer = Vec::new();
        TicketWriter::new(&mut buffer)
            .write_tickets(Vec::<TicketSummary>::new())
            .unwrap();
        assert!(buffer.is_empty());
    }
}
