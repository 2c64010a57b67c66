//! Pre-flight checks that short-circuit a request before it is sent.

use super::error::ApiError;

pub const MIN_EPOCHS: i64 = 1;
pub const MAX_EPOCHS: i64 = 500;

/// Plot files the backend is willing to serve for a run.
pub const ALLOWED_PLOTS: &[&str] = &[
    "results.png",
    "confusion_matrix.png",
    "confusion_matrix_normalized.png",
    "R_curve.png",
    "P_curve.png",
    "F1_curve.png",
    "PR_curve.png",
];

/// Accept an epoch count in `1..=500`.
pub fn validate_epochs(epochs: i64) -> Result<u32, ApiError> {
    if !(MIN_EPOCHS..=MAX_EPOCHS).contains(&epochs) {
        return Err(ApiError::Validation(format!(
            "Epochs must be a whole number between {MIN_EPOCHS} and {MAX_EPOCHS}, got {epochs}"
        )));
    }
    Ok(epochs as u32)
}

/// Parse user-typed epoch input, rejecting anything that is not a whole number.
pub fn parse_epochs(input: &str) -> Result<u32, ApiError> {
    let trimmed = input.trim();
    let epochs = trimmed.parse::<i64>().map_err(|_| {
        ApiError::Validation(format!(
            "Epochs must be a whole number between {MIN_EPOCHS} and {MAX_EPOCHS}, got '{trimmed}'"
        ))
    })?;
    validate_epochs(epochs)
}

pub fn validate_confidence(confidence: f64) -> Result<f64, ApiError> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ApiError::Validation(format!(
            "Confidence must be between 0.0 and 1.0, got {confidence}"
        )));
    }
    Ok(confidence)
}

/// Trim class names and drop blanks; at least one must remain.
pub fn normalize_classes(classes: &[String]) -> Result<Vec<String>, ApiError> {
    let cleaned: Vec<String> = classes
        .iter()
        .map(|class| class.trim())
        .filter(|class| !class.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.is_empty() {
        return Err(ApiError::Validation("No valid classes provided".into()));
    }
    Ok(cleaned)
}

pub fn validate_plot_name(plot_name: &str) -> Result<(), ApiError> {
    if ALLOWED_PLOTS.contains(&plot_name) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Unknown plot '{plot_name}'; expected one of {}",
            ALLOWED_PLOTS.join(", ")
        )))
    }
}

pub fn validate_run_name(run_name: &str) -> Result<(), ApiError> {
    if run_name.trim().is_empty() {
        return Err(ApiError::Validation("Run name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_boundaries() {
        assert_eq!(validate_epochs(1), Ok(1));
        assert_eq!(validate_epochs(500), Ok(500));
        for rejected in [0, -1, 501, i64::MAX, i64::MIN] {
            assert!(
                matches!(validate_epochs(rejected), Err(ApiError::Validation(_))),
                "{rejected} should be rejected"
            );
        }
    }

    #[test]
    fn epoch_input_must_be_a_whole_number() {
        assert_eq!(parse_epochs(" 50 "), Ok(50));
        for input in ["", "abc", "12.5", "1e3", "-3", "501"] {
            assert!(parse_epochs(input).is_err(), "'{input}' should be rejected");
        }
    }

    #[test]
    fn every_epoch_in_range_is_accepted_and_nothing_else() {
        for n in -5..=505 {
            let accepted = validate_epochs(n).is_ok();
            assert_eq!(accepted, (1..=500).contains(&n), "epochs {n}");
        }
    }

    #[test]
    fn confidence_range() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.5).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
    }

    #[test]
    fn classes_are_trimmed_and_blank_entries_dropped() {
        let cleaned = normalize_classes(&[" cup ".into(), "".into(), "plate".into()]).unwrap();
        assert_eq!(cleaned, vec!["cup".to_string(), "plate".to_string()]);
        assert!(normalize_classes(&["  ".into()]).is_err());
    }

    #[test]
    fn only_known_plots_are_requested() {
        assert!(validate_plot_name("results.png").is_ok());
        assert!(validate_plot_name("../../etc/passwd").is_err());
    }
}
