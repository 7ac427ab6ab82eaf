//! Nigerian bank directory and account number checks.

use crate::payments::types::Bank;

/// Banks offered as one-tap choices, as (name, Paystack code).
pub const POPULAR_BANKS: &[(&str, &str)] = &[
    ("Access Bank", "044"),
    ("Zenith Bank", "057"),
    ("Guaranty Trust Bank", "058"),
    ("First Bank of Nigeria", "011"),
    ("United Bank for Africa (UBA)", "033"),
    ("Kuda MFB", "090267"),
    ("Fidelity Bank", "070"),
    ("Union Bank of Nigeria", "032"),
    ("Sterling Bank", "232"),
    ("Wema Bank", "023"),
    ("Heritage Bank", "030"),
    ("Keystone Bank", "082"),
    ("Polaris Bank", "076"),
    ("Stanbic IBTC Bank", "221"),
    ("Standard Chartered Bank", "068"),
    ("Opay paycom", "810"),
    ("Globus Bank", "001031"),
    ("Palmpay", "100033"),
    ("Providus Bank", "101"),
    ("Moniepoint MFB", "50197"),
];

pub fn popular_banks() -> Vec<Bank> {
    POPULAR_BANKS
        .iter()
        .map(|(name, code)| Bank {
            name: name.to_string(),
            code: code.to_string(),
        })
        .collect()
}

pub fn find_bank_by_code<'a>(banks: &'a [Bank], code: &str) -> Option<&'a Bank> {
    let code = code.trim();
    banks.iter().find(|b| b.code == code)
}

/// Match typed input against a code first, then a case-insensitive name
/// substring.
pub fn find_bank<'a>(banks: &'a [Bank], query: &str) -> Option<&'a Bank> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    if let Some(bank) = find_bank_by_code(banks, query) {
        return Some(bank);
    }
    let needle = query.to_lowercase();
    banks
        .iter()
        .find(|b| b.name.to_lowercase().contains(&needle))
}

/// Ten digits, and for three-digit (commercial bank) codes a valid NUBAN
/// check digit.
pub fn validate_account_number(account_number: &str, bank_code: &str) -> Result<(), String> {
    if account_number.len() != 10 || !account_number.chars().all(|c| c.is_ascii_digit()) {
        return Err("account number must be exactly 10 digits".to_string());
    }
    if bank_code.len() == 3
        && bank_code.chars().all(|c| c.is_ascii_digit())
        && nuban::Nuban::new(bank_code, account_number).is_err()
    {
        return Err("account number failed the NUBAN check for this bank".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_code_and_name() {
        let banks = popular_banks();
        assert_eq!(find_bank(&banks, "058").unwrap().name, "Guaranty Trust Bank");
        assert_eq!(find_bank(&banks, "kuda").unwrap().code, "090267");
        assert_eq!(find_bank(&banks, "  ZENITH ").unwrap().code, "057");
        assert!(find_bank(&banks, "Atlantis").is_none());
        assert!(find_bank(&banks, "").is_none());
    }

    #[test]
    fn account_number_shape() {
        assert!(validate_account_number("2012345678", "090267").is_ok());
        assert!(validate_account_number("201234567", "090267").is_err());
        assert!(validate_account_number("20123456a8", "090267").is_err());
    }
}
