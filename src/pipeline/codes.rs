//! Lexical extraction of billing and diagnosis codes from model output.
//!
//! Matches are returned in order of first occurrence with duplicates kept.
//! CPT and HCPCS share one five-digit pattern; which system a token belongs
//! to is decided by the prompt category that produced the text.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::CodeSystem;

/// Letter A-T or V-Z, two digits, optional dot and one to three digits.
static ICD10_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-TV-Z]\d{2}(?:\.\d{1,3})?\b").unwrap());

static FIVE_DIGIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{5}\b").unwrap());

pub fn extract_icd10_codes(text: &str) -> Vec<String> {
    ICD10_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn extract_cpt_codes(text: &str) -> Vec<String> {
    FIVE_DIGIT_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn extract_hcpcs_codes(text: &str) -> Vec<String> {
    extract_cpt_codes(text)
}

/// Extract tokens for the given code system.
pub fn extract_codes(system: CodeSystem, text: &str) -> Vec<String> {
    match system {
        CodeSystem::Icd10 => extract_icd10_codes(text),
        CodeSystem::Cpt => extract_cpt_codes(text),
        CodeSystem::Hcpcs => extract_hcpcs_codes(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icd_boundary_example() {
        let text = "Diagnosis E11.9, prior 250.00 note";
        assert_eq!(extract_icd10_codes(text), vec!["E11.9"]);
        assert!(extract_cpt_codes(text).is_empty());
        assert!(extract_hcpcs_codes(text).is_empty());
    }

    #[test]
    fn icd_excludes_letter_u() {
        assert!(extract_icd10_codes("U07.1 is reserved").is_empty());
        assert_eq!(extract_icd10_codes("V01.0 and Z00.00"), vec!["V01.0", "Z00.00"]);
    }

    #[test]
    fn icd_without_decimal() {
        assert_eq!(extract_icd10_codes("Code I10 applies"), vec!["I10"]);
    }

    #[test]
    fn icd_with_four_decimals_keeps_only_category() {
        // No boundary after one to three decimals, so only the part before the dot matches.
        assert_eq!(extract_icd10_codes("E11.6543"), vec!["E11"]);
    }

    #[test]
    fn icd_requires_uppercase_and_boundaries() {
        assert!(extract_icd10_codes("e11.9 lowercase").is_empty());
        assert!(extract_icd10_codes("XE11.9").is_empty());
    }

    #[test]
    fn duplicates_retained_in_first_occurrence_order() {
        let text = "J20.9 then E11.9 then J20.9 again";
        assert_eq!(extract_icd10_codes(text), vec!["J20.9", "E11.9", "J20.9"]);
        assert_eq!(
            extract_cpt_codes("99213, 10021, 99213"),
            vec!["99213", "10021", "99213"]
        );
    }

    #[test]
    fn five_digit_tokens_need_word_boundaries() {
        assert!(extract_cpt_codes("123456").is_empty());
        assert!(extract_cpt_codes("1234").is_empty());
        assert_eq!(extract_cpt_codes("CPT:99213."), vec!["99213"]);
    }

    #[test]
    fn hcpcs_letter_codes_are_not_matched() {
        // Level II codes like J3420 do not have the five-digit shape.
        assert!(extract_hcpcs_codes("Inject J3420 monthly").is_empty());
    }

    #[test]
    fn cpt_and_hcpcs_share_a_pattern() {
        let text = "Procedures: 36415 and 80053";
        assert_eq!(extract_cpt_codes(text), extract_hcpcs_codes(text));
    }

    #[test]
    fn empty_input_yields_empty_list() {
        for system in [CodeSystem::Icd10, CodeSystem::Cpt, CodeSystem::Hcpcs] {
            assert!(extract_codes(system, "").is_empty());
            assert!(extract_codes(system, "no codes here").is_empty());
        }
    }
}
