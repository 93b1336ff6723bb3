//! Invoice records, proration line generation, and invoice numbering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InvoiceNumberConfig;
use crate::error::{BillingError, Result};
use crate::price::validate_currency;
use crate::proration::ProrationResult;

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Mutable, not yet presented to the customer.
    Draft,
    /// Finalized and awaiting payment.
    Open,
    Paid,
    Void,
}

/// A single invoice line. Negative amounts are credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    /// Plan the line refers to, when plan-derived.
    pub plan_id: Option<String>,
    /// Minor-unit amount; credits are negative.
    pub amount: i64,
    /// Service period covered by this line.
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// An invoice for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    /// Human-facing number, assigned at finalization.
    pub number: Option<String>,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub currency: String,
    pub status: InvoiceStatus,
    pub lines: Vec<InvoiceLine>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a draft invoice.
    ///
    /// # Errors
    ///
    /// Fails on an empty line set or an invalid currency before any state
    /// is created.
    pub fn new(
        customer_id: impl Into<String>,
        currency: impl Into<String>,
        lines: Vec<InvoiceLine>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if lines.is_empty() {
            return Err(BillingError::validation(
                "invoice must have at least one line",
            ));
        }
        let currency = currency.into();
        validate_currency(&currency)?;

        Ok(Self {
            id: format!("inv_{}", uuid::Uuid::new_v4().simple()),
            number: None,
            customer_id: customer_id.into(),
            subscription_id: None,
            currency,
            status: InvoiceStatus::Draft,
            lines,
            created_at,
        })
    }

    /// Attach the invoice to a subscription.
    #[must_use]
    pub fn for_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Sum of all lines; negative when credits dominate.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.lines.iter().map(|line| line.amount).sum()
    }

    /// Finalize the draft, assigning its number.
    ///
    /// # Errors
    ///
    /// Fails with a state conflict on anything but a draft.
    pub fn finalize(&mut self, number: String) -> Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(BillingError::StateConflict {
                message: format!("cannot finalize invoice in status {:?}", self.status),
            });
        }
        self.number = Some(number);
        self.status = InvoiceStatus::Open;
        Ok(())
    }

    /// Mark an open invoice paid.
    pub fn mark_paid(&mut self) -> Result<()> {
        if self.status != InvoiceStatus::Open {
            return Err(BillingError::StateConflict {
                message: format!("cannot pay invoice in status {:?}", self.status),
            });
        }
        self.status = InvoiceStatus::Paid;
        Ok(())
    }

    /// Void the invoice. Voiding a paid invoice is illegal; voiding an
    /// already-void invoice is a no-op.
    pub fn void(&mut self) -> Result<()> {
        match self.status {
            InvoiceStatus::Void => Ok(()),
            InvoiceStatus::Paid => Err(BillingError::StateConflict {
                message: "cannot void a paid invoice".to_string(),
            }),
            _ => {
                self.status = InvoiceStatus::Void;
                Ok(())
            }
        }
    }
}

/// Build the credit and charge lines for a mid-period plan change.
///
/// The credit line carries the unused remainder of the old plan as a
/// negative amount; the charge line carries the prorated new plan. Both
/// cover the remaining service period.
#[must_use]
pub fn proration_lines(
    proration: &ProrationResult,
    old_plan: &str,
    new_plan: &str,
    change_at: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Vec<InvoiceLine> {
    vec![
        InvoiceLine {
            description: format!("Unused time on {old_plan}"),
            plan_id: Some(old_plan.to_string()),
            amount: -proration.unused_credit,
            period_start: change_at,
            period_end,
        },
        InvoiceLine {
            description: format!("Remaining time on {new_plan}"),
            plan_id: Some(new_plan.to_string()),
            amount: proration.new_plan_prorated,
            period_start: change_at,
            period_end,
        },
    ]
}

/// Format an invoice number as `<prefix>-<year>-<zero-padded sequence>`.
///
/// # Errors
///
/// Rejects sequence 0 and any sequence that does not fit the configured
/// digit width.
pub fn generate_invoice_number(
    config: &InvoiceNumberConfig,
    year: i32,
    sequence: u64,
) -> Result<String> {
    let cap = 10u64.pow(config.sequence_digits as u32) - 1;
    if sequence == 0 || sequence > cap {
        return Err(BillingError::validation(format!(
            "invoice sequence must be in 1..={cap}, got {sequence}"
        )));
    }
    Ok(format!(
        "{}-{}-{:0width$}",
        config.prefix,
        year,
        sequence,
        width = config.sequence_digits
    ))
}

/// Recover `(prefix, year, sequence)` from a generated invoice number.
pub fn parse_invoice_number(number: &str) -> Result<(String, i32, u64)> {
    let malformed = || BillingError::validation(format!("malformed invoice number: {number}"));

    // The prefix may itself contain dashes; year and sequence never do.
    let (rest, sequence_part) = number.rsplit_once('-').ok_or_else(malformed)?;
    let (prefix, year_part) = rest.rsplit_once('-').ok_or_else(malformed)?;

    if prefix.is_empty() || sequence_part.is_empty() {
        return Err(malformed());
    }
    let year: i32 = year_part.parse().map_err(|_| malformed())?;
    let sequence: u64 = sequence_part.parse().map_err(|_| malformed())?;
    if sequence == 0 {
        return Err(malformed());
    }

    Ok((prefix.to_string(), year, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proration::ProrationCalculator;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn sample_line() -> InvoiceLine {
        InvoiceLine {
            description: "Pro plan".to_string(),
            plan_id: Some("pro".to_string()),
            amount: 4999,
            period_start: utc(2024, 1, 1),
            period_end: utc(2024, 2, 1),
        }
    }

    #[test]
    fn test_empty_lines_rejected() {
        let err = Invoice::new("cus_1", "usd", vec![], utc(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }

    #[test]
    fn test_lifecycle() {
        let mut invoice =
            Invoice::new("cus_1", "usd", vec![sample_line()], utc(2024, 1, 1)).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.total(), 4999);

        invoice.finalize("INV-2024-000001".to_string()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Open);

        // Finalizing a non-draft is a conflict
        assert!(invoice.finalize("INV-2024-000002".to_string()).is_err());

        invoice.mark_paid().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);

        // Voiding a paid invoice is a conflict
        let err = invoice.void().unwrap_err();
        assert!(matches!(err, BillingError::StateConflict { .. }));
    }

    #[test]
    fn test_void_is_idempotent_from_open() {
        let mut invoice =
            Invoice::new("cus_1", "usd", vec![sample_line()], utc(2024, 1, 1)).unwrap();
        invoice.finalize("INV-2024-000001".to_string()).unwrap();

        invoice.void().unwrap();
        invoice.void().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Void);
    }

    #[test]
    fn test_proration_lines_balance_to_net() {
        let proration = ProrationCalculator::new()
            .calculate(1999, 4999, 15, 30)
            .unwrap();
        let lines = proration_lines(
            &proration,
            "starter",
            "pro",
            utc(2024, 1, 16),
            utc(2024, 2, 1),
        );

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].amount, -1000);
        assert_eq!(lines[1].amount, 2500);
        let total: i64 = lines.iter().map(|l| l.amount).sum();
        assert_eq!(total, proration.net_amount);
    }

    #[test]
    fn test_invoice_number_round_trip() {
        let config = InvoiceNumberConfig::default();
        for sequence in [1u64, 42, 999, 999_999] {
            let number = generate_invoice_number(&config, 2024, sequence).unwrap();
            let (prefix, year, parsed) = parse_invoice_number(&number).unwrap();
            assert_eq!(prefix, "INV");
            assert_eq!(year, 2024);
            assert_eq!(parsed, sequence);
        }
    }

    #[test]
    fn test_invoice_number_formatting() {
        let config = InvoiceNumberConfig::default();
        assert_eq!(
            generate_invoice_number(&config, 2024, 42).unwrap(),
            "INV-2024-000042"
        );
    }

    #[test]
    fn test_invoice_number_bounds() {
        let config = InvoiceNumberConfig::default();
        assert!(generate_invoice_number(&config, 2024, 0).is_err());
        assert!(generate_invoice_number(&config, 2024, 1_000_000).is_err());
        assert!(generate_invoice_number(&config, 2024, 999_999).is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "INV", "INV-2024", "INV-abcd-000001", "INV-2024-xyz", "INV-2024-000000"] {
            assert!(parse_invoice_number(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_parse_with_dashed_prefix() {
        let config = InvoiceNumberConfig {
            prefix: "ACME-EU".to_string(),
            sequence_digits: 6,
        };
        let number = generate_invoice_number(&config, 2025, 7).unwrap();
        let (prefix, year, sequence) = parse_invoice_number(&number).unwrap();
        assert_eq!(prefix, "ACME-EU");
        assert_eq!(year, 2025);
        assert_eq!(sequence, 7);
    }
}
