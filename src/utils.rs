

#[inline]
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}


#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}


/// Keeps the last four characters of an identifier for log lines.
pub fn mask_identifier(identifier: &str) -> String {
    let count = identifier.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let visible: String = identifier.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_multibyte() {
        assert_eq!(safe_truncate("Peñalosa Núñez", 6), "Peñalo");
    }

    #[test]
    fn test_safe_truncate_shorter() {
        assert_eq!(safe_truncate("hi", 10), "hi");
    }

    #[test]
    fn test_safe_truncate_ellipsis() {
        assert_eq!(safe_truncate_ellipsis("03AGdBq24PBCbw", 5), "03AGd...");
        assert_eq!(safe_truncate_ellipsis("hi", 10), "hi");
    }

    #[test]
    fn test_mask_identifier() {
        assert_eq!(mask_identifier("1234567890"), "******7890");
        assert_eq!(mask_identifier("123"), "***");
    }
}
