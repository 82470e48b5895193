//! Validation utilities for the Metal Recovery Platform
//!
//! Includes Brazil-specific validations for client and fiscal documents.

use rust_decimal::Decimal;

// ============================================================================
// Metal Accounting Validations
// ============================================================================

/// Validate a gram amount is strictly positive
pub fn validate_positive_grams(grams: Decimal) -> Result<(), &'static str> {
    if grams <= Decimal::ZERO {
        return Err("Gram amount must be positive");
    }
    Ok(())
}

/// Validate a currency price is strictly positive
pub fn validate_positive_price(price: Decimal) -> Result<(), &'static str> {
    if price <= Decimal::ZERO {
        return Err("Price must be positive");
    }
    Ok(())
}

/// Validate a percentage expressed as a fraction in [0, 1]
pub fn validate_fraction(fraction: Decimal) -> Result<(), &'static str> {
    if fraction < Decimal::ZERO || fraction > Decimal::ONE {
        return Err("Fraction must be between 0 and 1");
    }
    Ok(())
}

/// Validate an assayed purity, a fraction in (0, 1]
pub fn validate_purity(purity: Decimal) -> Result<(), &'static str> {
    if purity <= Decimal::ZERO || purity > Decimal::ONE {
        return Err("Purity must be greater than 0 and at most 1");
    }
    Ok(())
}

fn validate_document_number(number: &str, prefix: &str) -> Result<(), &'static str> {
    let rest = match number.strip_prefix(prefix) {
        Some(rest) => rest,
        None => return Err("Document number has the wrong prefix"),
    };
    let digits = match rest.strip_prefix('-') {
        Some(digits) => digits,
        None => return Err("Document number must use a dash separator"),
    };
    if digits.len() < 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("Document number must end in at least four digits");
    }
    Ok(())
}

/// Validate an analysis document number
/// Format: AQ-NNNN (e.g., AQ-0042)
pub fn validate_analysis_number(number: &str) -> Result<(), &'static str> {
    validate_document_number(number, "AQ")
}

/// Validate a recovery order document number
/// Format: OR-NNNN (e.g., OR-0007)
pub fn validate_order_number(number: &str) -> Result<(), &'static str> {
    validate_document_number(number, "OR")
}

/// Check if a decimal already sits at the standard gram scale
pub fn is_standard_gram_scale(value: Decimal) -> bool {
    value.scale() <= crate::models::GRAM_SCALE
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => return Err("Invalid email format"),
    };
    if local.is_empty() || domain.len() < 3 || !domain.contains('.') {
        return Err("Invalid email format");
    }
    Ok(())
}

// ============================================================================
// Brazil-Specific Validations
// ============================================================================

/// Validate a Brazilian phone number
/// Accepts: 11987654321, (11) 98765-4321, +5511987654321
pub fn validate_brazilian_phone(phone: &str) -> Result<(), &'static str> {
    let digits: Vec<u32> = phone.chars().filter_map(|c| c.to_digit(10)).collect();

    match digits.len() {
        // Landline: area code + 8 digits
        10 => Ok(()),
        // Mobile: area code + 9 + 8 digits
        11 => Ok(()),
        // Either of the above behind country code 55
        12 | 13 if digits[0] == 5 && digits[1] == 5 => Ok(()),
        _ => Err("Invalid Brazilian phone number format"),
    }
}

/// Validate a CPF (Cadastro de Pessoas Físicas)
/// 11-digit individual taxpayer number with two check digits
pub fn validate_cpf(cpf: &str) -> Result<(), &'static str> {
    let digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != 11 {
        return Err("CPF must be 11 digits");
    }

    // Sequences of a single repeated digit pass the checksum but are not valid
    if digits.iter().all(|&d| d == digits[0]) {
        return Err("CPF cannot be a repeated digit sequence");
    }

    let check = |count: usize| -> u32 {
        let sum: u32 = digits
            .iter()
            .take(count)
            .enumerate()
            .map(|(i, &d)| d * (count as u32 + 1 - i as u32))
            .sum();
        (sum * 10) % 11 % 10
    };

    if check(9) != digits[9] {
        return Err("Invalid CPF checksum");
    }
    if check(10) != digits[10] {
        return Err("Invalid CPF checksum");
    }

    Ok(())
}

/// Validate a CNPJ (Cadastro Nacional da Pessoa Jurídica)
/// 14-digit company taxpayer number with two check digits
pub fn validate_cnpj(cnpj: &str) -> Result<(), &'static str> {
    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != 14 {
        return Err("CNPJ must be 14 digits");
    }

    if digits.iter().all(|&d| d == digits[0]) {
        return Err("CNPJ cannot be a repeated digit sequence");
    }

    let check = |count: usize| -> u32 {
        // Weights run 2..9 from the rightmost digit leftwards
        let sum: u32 = digits
            .iter()
            .take(count)
            .rev()
            .enumerate()
            .map(|(i, &d)| d * (2 + (i as u32 % 8)))
            .sum();
        let rem = sum % 11;
        if rem < 2 {
            0
        } else {
            11 - rem
        }
    };

    if check(12) != digits[12] {
        return Err("Invalid CNPJ checksum");
    }
    if check(13) != digits[13] {
        return Err("Invalid CNPJ checksum");
    }

    Ok(())
}
