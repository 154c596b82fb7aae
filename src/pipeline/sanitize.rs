/// Clean model output before it is digested, sealed or mined for codes.
/// Drops NUL and other control characters, normalizes line endings and
/// trims surrounding whitespace. Interior whitespace is kept so the digest
/// of a deterministic reply is stable across runs.
pub fn sanitize_model_output(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}
