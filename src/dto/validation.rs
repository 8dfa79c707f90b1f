//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::cron::CronExpr;

/// Validates that a string is a well-formed five-field cron expression.
pub fn validate_cron_expression(expression: &str) -> Result<(), ValidationError> {
    if let Err(parse_err) = CronExpr::parse(expression) {
        let mut err = ValidationError::new("cron_expression");
        err.message = Some(format!("invalid cron expression: {parse_err}").into());
        return Err(err);
    }
    Ok(())
}
