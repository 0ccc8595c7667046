//! Age computation and the verdict handed back to the front end

use chrono::{Datelike, NaiveDate};

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoDate,
    InvalidDate,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoDate => "no_date",
            FailureReason::InvalidDate => "invalid_date",
        }
    }
}

/// Outcome of one verification attempt. Only ever carried in a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationVerdict {
    Success,
    Underage,
    Failed(FailureReason),
    Error,
}

impl VerificationVerdict {
    pub fn for_age(age: i32, minimum_age: i32) -> Self {
        if age >= minimum_age {
            VerificationVerdict::Success
        } else {
            VerificationVerdict::Underage
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationVerdict::Success => "success",
            VerificationVerdict::Underage => "underage",
            VerificationVerdict::Failed(_) => "failed",
            VerificationVerdict::Error => "error",
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            VerificationVerdict::Failed(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Append `verification` (and `reason` for failures) to `base`, which may
    /// be a relative path or an absolute URL and may already have a query.
    pub fn redirect_url(&self, base: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("verification", self.as_str());
        if let Some(reason) = self.reason() {
            query.append_pair("reason", reason);
        }
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}", base, separator, query.finish())
    }
}

/// Parse the `birthdate` claim. OIDC specifies `YYYY-MM-DD`; a trailing time
/// component is tolerated.
pub fn parse_birthdate(raw: &str) -> Result<NaiveDate, AuthError> {
    let trimmed = raw.trim();
    trimmed
        .get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .ok_or_else(|| AuthError::InvalidBirthdate(trimmed.to_string()))
}

/// Whole years between `birthdate` and `today`; the current year only counts
/// once the birthday's month and day have been reached.
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
