use crate::config::schema::AgentConfig;
use crate::error::{AgentError, Result};

/// Validate configuration bounds
pub fn validate_config(config: &AgentConfig) -> Result<()> {
    let locator = &config.locator;
    if locator.max_elements == 0 {
        return Err(AgentError::Config(
            "locator.max_elements must be greater than 0".to_string(),
        ));
    }
    if locator.max_address_depth == 0 {
        return Err(AgentError::Config(
            "locator.max_address_depth must be greater than 0".to_string(),
        ));
    }
    validate_pixels("locator.min_size_px", locator.min_size_px)?;
    validate_pixels("locator.row_tolerance_px", locator.row_tolerance_px)?;

    if config.snapshot.text_snippet_chars == 0 {
        return Err(AgentError::Config(
            "snapshot.text_snippet_chars must be greater than 0".to_string(),
        ));
    }
    validate_pixels("snapshot.edge_tolerance_px", config.snapshot.edge_tolerance_px)?;

    let input = &config.input;
    validate_fraction("input.scroll_fraction", input.scroll_fraction)?;
    validate_fraction("input.scroll_noise_fraction", input.scroll_noise_fraction)?;
    if !(input.max_scroll_px.is_finite() && input.max_scroll_px > 0.0) {
        return Err(AgentError::Config(
            "input.max_scroll_px must be positive".to_string(),
        ));
    }

    let cursor = &config.cursor;
    if cursor.max_steps == 0 || cursor.default_steps == 0 {
        return Err(AgentError::Config(
            "cursor step counts must be greater than 0".to_string(),
        ));
    }
    if cursor.default_steps > cursor.max_steps {
        return Err(AgentError::Config(format!(
            "cursor.default_steps ({}) exceeds cursor.max_steps ({})",
            cursor.default_steps, cursor.max_steps
        )));
    }
    if cursor.default_duration_ms > cursor.max_duration_ms {
        return Err(AgentError::Config(format!(
            "cursor.default_duration_ms ({}) exceeds cursor.max_duration_ms ({})",
            cursor.default_duration_ms, cursor.max_duration_ms
        )));
    }

    let recorder = &config.recorder;
    if recorder.poll_interval_ms == 0 {
        return Err(AgentError::Config(
            "recorder.poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    validate_pixels("recorder.scroll_min_px", recorder.scroll_min_px)?;
    if recorder.key_allow_list.is_empty() {
        return Err(AgentError::Config(
            "recorder.key_allow_list cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_fraction(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(AgentError::Config(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Finite and not negative
fn validate_pixels(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(AgentError::Config(format!(
            "{} must be a finite, non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}
