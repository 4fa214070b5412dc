//! CVSS 3.1 base-score computation and severity derivation.
//!
//! Advisories carry severity in wildly inconsistent shapes: a numeric
//! score, a CVSS vector, a number buried in free text, a score field in
//! `database_specific`, or just a severity word. Derivation tries each
//! source in a fixed order and stops at the first success.

use serde_json::Value;
use tracing::debug;

use super::Severity;

/// Parsed CVSS 3.x metric weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvssMetrics {
    pub attack_vector: f64,
    pub attack_complexity: f64,
    pub privileges_required: f64,
    pub user_interaction: f64,
    pub scope_changed: bool,
    pub confidentiality: f64,
    pub integrity: f64,
    pub availability: f64,
}

/// Parse a `CVSS:3.x/AV:N/AC:L/...` vector into metric weights.
/// Returns `None` when any of the eight base metrics is missing or has an
/// unknown value.
pub fn parse_vector(vector: &str) -> Option<CvssMetrics> {
    if !vector.starts_with("CVSS:3") {
        return None;
    }

    let mut av = None;
    let mut ac = None;
    let mut pr = None;
    let mut ui = None;
    let mut scope = None;
    let mut c = None;
    let mut i = None;
    let mut a = None;

    for part in vector.split('/').skip(1) {
        let Some((metric, value)) = part.split_once(':') else {
            continue;
        };
        match metric {
            "AV" => {
                av = match value {
                    "N" => Some(0.85),
                    "A" => Some(0.62),
                    "L" => Some(0.55),
                    "P" => Some(0.2),
                    _ => return None,
                }
            }
            "AC" => {
                ac = match value {
                    "L" => Some(0.77),
                    "H" => Some(0.44),
                    _ => return None,
                }
            }
            // PR weights depend on scope; keep the letter for now
            "PR" => {
                pr = match value {
                    "N" | "L" | "H" => Some(value),
                    _ => return None,
                }
            }
            "UI" => {
                ui = match value {
                    "N" => Some(0.85),
                    "R" => Some(0.62),
                    _ => return None,
                }
            }
            "S" => {
                scope = match value {
                    "U" => Some(false),
                    "C" => Some(true),
                    _ => return None,
                }
            }
            "C" => c = impact_weight(value),
            "I" => i = impact_weight(value),
            "A" => a = impact_weight(value),
            _ => {}
        }
    }

    let scope_changed = scope?;
    let privileges_required = match (pr?, scope_changed) {
        ("N", _) => 0.85,
        ("L", false) => 0.62,
        ("L", true) => 0.68,
        ("H", false) => 0.27,
        ("H", true) => 0.5,
        _ => return None,
    };

    Some(CvssMetrics {
        attack_vector: av?,
        attack_complexity: ac?,
        privileges_required,
        user_interaction: ui?,
        scope_changed,
        confidentiality: c?,
        integrity: i?,
        availability: a?,
    })
}

fn impact_weight(value: &str) -> Option<f64> {
    match value {
        "H" => Some(0.56),
        "L" => Some(0.22),
        "N" => Some(0.0),
        _ => None,
    }
}

/// CVSS 3.1 base score for parsed metrics, rounded up to 0.1.
pub fn base_score(m: &CvssMetrics) -> f64 {
    let iss = 1.0 - ((1.0 - m.confidentiality) * (1.0 - m.integrity) * (1.0 - m.availability));
    let impact = if m.scope_changed {
        7.52 * (iss - 0.029) - 3.25 * (iss - 0.02).powi(15)
    } else {
        6.42 * iss
    };
    if impact <= 0.0 {
        return 0.0;
    }
    let exploitability =
        8.22 * m.attack_vector * m.attack_complexity * m.privileges_required * m.user_interaction;
    roundup((impact + exploitability).min(10.0))
}

/// CVSS "round up to one decimal" as specified: 8.21 becomes 8.3 only if
/// there is a real fractional remainder past the first decimal.
fn roundup(value: f64) -> f64 {
    let scaled = (value * 100_000.0).round() as i64;
    if scaled % 10_000 == 0 {
        scaled as f64 / 100_000.0
    } else {
        ((scaled / 10_000) as f64 + 1.0) / 10.0
    }
}

/// Extract a numeric score embedded as free text, e.g. `"... score:7.5"`.
///
/// All indexing happens on the lowercased copy: lowercasing can change
/// byte lengths (e.g. `İ`), so offsets found in it must not be applied to
/// the original. Digits and `.` are unaffected by the case mapping.
pub fn extract_embedded_score(text: &str) -> Option<f64> {
    let lower = text.to_lowercase();
    let pos = lower.find("score:")?;
    let rest = &lower[pos + "score:".len()..];
    let rest = rest.trim_start();
    let end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].parse::<f64>().ok()
}

/// Conservative fixed scores assigned to bare severity words when no
/// numeric score exists anywhere on the advisory.
fn fixed_score_for_word(word: &str) -> Option<f64> {
    match word {
        "CRITICAL" => Some(9.0),
        "HIGH" => Some(7.0),
        // MODERATE is GHSA's spelling of MEDIUM
        "MEDIUM" | "MODERATE" => Some(5.0),
        "LOW" => Some(3.0),
        _ => None,
    }
}

fn find_severity_word(text: &str) -> Option<f64> {
    let upper = text.to_uppercase();
    ["CRITICAL", "HIGH", "MODERATE", "MEDIUM", "LOW"]
        .iter()
        .find(|word| upper.contains(*word))
        .and_then(|word| fixed_score_for_word(word))
}

/// Numeric score fields looked up in `database_specific` /
/// `ecosystem_specific` payloads.
const SCORE_KEYS: &[&str] = &["cvss_score", "base_score", "score", "cvss"];

fn numeric_score_from_payload(payload: &Value) -> Option<f64> {
    let object = payload.as_object()?;
    for key in SCORE_KEYS {
        match object.get(*key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

/// Derive `(score, severity)` for one advisory.
///
/// Checked in order, first success wins:
/// 1. a CVSS-typed severity entry with a plain numeric score,
/// 2. a CVSS 3.x vector string, computed,
/// 3. a `score:N` fragment embedded in the severity text,
/// 4. a numeric score field in `database_specific`/`ecosystem_specific`,
/// 5. a severity word anywhere, mapped to a conservative fixed score,
/// 6. MEDIUM when any severity-bearing field was present at all,
///    UNKNOWN otherwise.
///
/// Step 6 intentionally overstates unparsable data rather than hiding it;
/// a finding with garbled severity still surfaces as MEDIUM.
pub fn derive_severity(
    severity_entries: &[(String, String)],
    database_specific: Option<&Value>,
    ecosystem_specific: Option<&Value>,
) -> (Option<f64>, Severity) {
    // Step 1: numeric score on a CVSS-typed entry
    for (entry_type, score) in severity_entries {
        if entry_type.starts_with("CVSS")
            && let Ok(parsed) = score.trim().parse::<f64>()
        {
            return (Some(parsed), Severity::from_score(parsed));
        }
    }

    // Step 2: computable vector string
    for (_, score) in severity_entries {
        if let Some(metrics) = parse_vector(score) {
            let computed = base_score(&metrics);
            return (Some(computed), Severity::from_score(computed));
        }
    }

    // Step 3: free-text embedded score
    for (_, score) in severity_entries {
        if let Some(embedded) = extract_embedded_score(score) {
            return (Some(embedded), Severity::from_score(embedded));
        }
    }

    // Step 4: payload score fields
    for payload in [database_specific, ecosystem_specific].into_iter().flatten() {
        if let Some(score) = numeric_score_from_payload(payload) {
            return (Some(score), Severity::from_score(score));
        }
    }

    // Step 5: severity word with a conservative fixed score
    for (_, score) in severity_entries {
        if let Some(fixed) = find_severity_word(score) {
            return (Some(fixed), Severity::from_score(fixed));
        }
    }
    for payload in [database_specific, ecosystem_specific].into_iter().flatten() {
        if let Some(fixed) = find_severity_word(&payload.to_string()) {
            return (Some(fixed), Severity::from_score(fixed));
        }
    }

    // Step 6: something severity-shaped existed but nothing parsed
    let had_signal = !severity_entries.is_empty()
        || database_specific.is_some_and(|v| !v.is_null())
        || ecosystem_specific.is_some_and(|v| !v.is_null());
    if had_signal {
        debug!("severity-bearing fields present but unparsable, defaulting to MEDIUM");
        (None, Severity::Medium)
    } else {
        (None, Severity::Unknown)
    }
}
