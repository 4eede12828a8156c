use crate::{
    entities::{challan, invoice, order, sequence_counter},
    errors::ServiceError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
};
use tracing::debug;

static TRAILING_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)$").expect("trailing sequence pattern"));

/// Document kinds that carry a human-readable yearly number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NumberKind {
    Order,
    Challan,
    Invoice,
}

impl NumberKind {
    pub fn prefix(self) -> &'static str {
        match self {
            NumberKind::Order => "ORD",
            NumberKind::Challan => "CH",
            NumberKind::Invoice => "INV",
        }
    }
}

/// Formats `<PREFIX>-<year>-<seq zero-padded to 4 digits>`.
pub fn format_number(kind: NumberKind, year: i32, sequence: i64) -> String {
    format!("{}-{}-{:04}", kind.prefix(), year, sequence)
}

fn parse_sequence(number: &str) -> Option<i64> {
    TRAILING_SEQUENCE
        .captures(number)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Allocates the next number for `(kind, year)`.
///
/// Must run inside the caller's transaction: the counter row is locked
/// for the remainder of that transaction, so two concurrent allocations
/// for the same kind and year serialize and never hand out the same
/// sequence. Counters only ever move forward; a soft-deleted document
/// does not release its number.
///
/// The first allocation for a `(kind, year)` seeds the counter from the
/// highest existing number with that prefix (soft-deleted rows
/// included), so the scheme picks up cleanly on pre-existing data and
/// resets to 1 on year rollover.
pub async fn next_number<C: ConnectionTrait>(
    conn: &C,
    kind: NumberKind,
    year: i32,
) -> Result<String, ServiceError> {
    let existing = sequence_counter::Entity::find_by_id((kind.prefix().to_string(), year))
        .lock_exclusive()
        .one(conn)
        .await?;

    let sequence = match existing {
        Some(counter) => {
            let next = counter.value + 1;
            let mut active: sequence_counter::ActiveModel = counter.into();
            active.value = Set(next);
            active.update(conn).await?;
            next
        }
        None => {
            let seed = max_existing_sequence(conn, kind, year).await?;
            let next = seed + 1;
            let counter = sequence_counter::ActiveModel {
                kind: Set(kind.prefix().to_string()),
                year: Set(year),
                value: Set(next),
            };
            // A concurrent first allocation for the same (kind, year)
            // hits the composite primary key here and aborts; the caller
            // retries the transaction.
            counter.insert(conn).await?;
            next
        }
    };

    let number = format_number(kind, year, sequence);
    debug!(kind = %kind, year, sequence, number = %number, "allocated document number");
    Ok(number)
}

/// Highest trailing sequence among existing numbers for the prefix,
/// soft-deleted rows included, since sequences are never reused.
async fn max_existing_sequence<C: ConnectionTrait>(
    conn: &C,
    kind: NumberKind,
    year: i32,
) -> Result<i64, ServiceError> {
    let prefix = format!("{}-{}-", kind.prefix(), year);

    let numbers: Vec<String> = match kind {
        NumberKind::Order => {
            order::Entity::find()
                .select_only()
                .column(order::Column::OrderNumber)
                .filter(order::Column::OrderNumber.starts_with(&prefix))
                .into_tuple()
                .all(conn)
                .await?
        }
        NumberKind::Challan => {
            challan::Entity::find()
                .select_only()
                .column(challan::Column::ChallanNumber)
                .filter(challan::Column::ChallanNumber.starts_with(&prefix))
                .into_tuple()
                .all(conn)
                .await?
        }
        NumberKind::Invoice => {
            invoice::Entity::find()
                .select_only()
                .column(invoice::Column::InvoiceNumber)
                .filter(invoice::Column::InvoiceNumber.starts_with(&prefix))
                .into_tuple()
                .all(conn)
                .await?
        }
    };

    Ok(numbers
        .iter()
        .filter_map(|n| parse_sequence(n))
        .max()
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_format_is_zero_padded() {
        assert_eq!(format_number(NumberKind::Order, 2026, 1), "ORD-2026-0001");
        assert_eq!(format_number(NumberKind::Challan, 2026, 42), "CH-2026-0042");
        assert_eq!(
            format_number(NumberKind::Invoice, 2025, 1234),
            "INV-2025-1234"
        );
        // Sequences past four digits widen rather than wrap.
        assert_eq!(
            format_number(NumberKind::Invoice, 2025, 12345),
            "INV-2025-12345"
        );
    }

    #[test]
    fn trailing_sequence_parses() {
        assert_eq!(parse_sequence("ORD-2026-0007"), Some(7));
        assert_eq!(parse_sequence("INV-2025-1234"), Some(1234));
        assert_eq!(parse_sequence("garbage"), None);
    }

    #[test]
    fn prefixes_are_distinct() {
        assert_eq!(NumberKind::Order.prefix(), "ORD");
        assert_eq!(NumberKind::Challan.prefix(), "CH");
        assert_eq!(NumberKind::Invoice.prefix(), "INV");
    }
}
