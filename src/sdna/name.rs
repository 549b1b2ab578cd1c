//! Decorated field names.
//!
//! Schema field names carry their C declarator: `*next` (pointer),
//! `**mat` (pointer to pointer), `(*func)()` (function pointer),
//! `name[66]` and `mat[4][4]` (fixed arrays).

/// A parsed field name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldName {
    /// Name as stored in the schema.
    pub full: String,
    /// Bare identifier, used to match fields across schemas.
    pub base: String,
    /// Number of leading `*`.
    pub pointer_depth: u8,
    /// Function pointer declarator.
    pub is_func: bool,
    /// Product of all array dimensions (1 for scalars), saturating.
    pub array_len: usize,
}

impl FieldName {
    pub fn parse(full: &str) -> Self {
        let is_func = full.starts_with("(*");
        let body = if is_func { &full[2..] } else { full };

        let pointer_depth = body.bytes().take_while(|&b| b == b'*').count() as u8;
        let body = &body[pointer_depth as usize..];

        let end = body
            .find(|c: char| c == '[' || c == ')')
            .unwrap_or(body.len());
        let base = body[..end].to_string();

        let mut array_len = 1usize;
        let mut rest = &body[end..];
        while let Some(open) = rest.find('[') {
            let Some(close) = rest[open..].find(']') else {
                break;
            };
            let dim = rest[open + 1..open + close].trim().parse::<usize>().unwrap_or(1);
            array_len = array_len.saturating_mul(dim);
            rest = &rest[open + close + 1..];
        }

        Self {
            full: full.to_string(),
            base,
            pointer_depth: if is_func { 1 } else { pointer_depth },
            is_func,
            array_len,
        }
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0 || self.is_func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain() {
        let n = FieldName::parse("totvert");
        assert_eq!(n.base, "totvert");
        assert!(!n.is_pointer());
        assert_eq!(n.array_len, 1);
    }

    #[test]
    fn test_pointers() {
        let n = FieldName::parse("**mat");
        assert_eq!(n.base, "mat");
        assert_eq!(n.pointer_depth, 2);

        let n = FieldName::parse("(*doit)()");
        assert_eq!(n.base, "doit");
        assert!(n.is_func);
        assert!(n.is_pointer());
    }

    #[test]
    fn test_arrays() {
        let n = FieldName::parse("name[66]");
        assert_eq!(n.base, "name");
        assert_eq!(n.array_len, 66);

        let n = FieldName::parse("obmat[4][4]");
        assert_eq!(n.array_len, 16);

        let n = FieldName::parse("*mtex[18]");
        assert_eq!(n.base, "mtex");
        assert_eq!(n.pointer_depth, 1);
        assert_eq!(n.array_len, 18);
    }
}
