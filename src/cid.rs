/// Syntactic CID validation
///
/// A pure gate run before any persistence or network call. Accepts the two
/// shapes clients send in practice:
/// - CIDv0: `Qm` followed by base58btc characters, at least 46 characters total
/// - CIDv1: multibase `b` prefix followed by lowercase alphanumerics (base32
///   lower, or base36 digits), at least 50 characters total

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const CIDV0_MIN_LEN: usize = 46;
const CIDV1_MIN_LEN: usize = 50;

/// Returns true if `cid` looks like a CIDv0 or CIDv1 string
pub fn is_valid_cid(cid: &str) -> bool {
    if cid.starts_with("Qm") {
        return cid.len() >= CIDV0_MIN_LEN && cid.chars().all(|c| BASE58_ALPHABET.contains(c));
    }

    if cid.starts_with('b') {
        return cid.len() >= CIDV1_MIN_LEN
            && cid
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIDV0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const CIDV1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    #[test]
    fn test_accepts_cidv0() {
        assert_eq!(CIDV0.len(), 46);
        assert!(is_valid_cid(CIDV0));
    }

    #[test]
    fn test_accepts_long_base58_after_qm() {
        let long = format!("{}{}", CIDV0, "abc123XYZ");
        assert!(is_valid_cid(&long));
    }

    #[test]
    fn test_accepts_cidv1() {
        assert!(is_valid_cid(CIDV1));
        assert!(is_valid_cid(
            "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
        ));
    }

    #[test]
    fn test_rejects_empty_and_short() {
        assert!(!is_valid_cid(""));
        assert!(!is_valid_cid("Qm"));
        assert!(!is_valid_cid("QmShort"));
        assert!(!is_valid_cid("bafy"));
        assert!(!is_valid_cid(&CIDV0[..45]));
    }

    #[test]
    fn test_rejects_invalid_charset() {
        // 0, O, I and l are not in the base58 alphabet
        assert!(!is_valid_cid("Qm0wAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(!is_valid_cid("QmOwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(!is_valid_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbd!"));
        assert!(!is_valid_cid(
            "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzDI"
        ));
        assert!(!is_valid_cid(
            "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fb-di"
        ));
    }

    #[test]
    fn test_rejects_unknown_prefix() {
        assert!(!is_valid_cid("zdj7WWeQ43G6JJvLWQWZpyHuAMq6uYWRjkBXFad11vE2LHhQ7"));
        assert!(!is_valid_cid("not-a-cid-at-all-but-long-enough-to-pass-length-checks"));
    }
}
