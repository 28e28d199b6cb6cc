use std::collections::BTreeMap;

/// Page key to remote sheet name mapping.  Unmapped pages use their key.
#[derive(Debug, Clone, Default)]
pub struct SheetMap {
    names: BTreeMap<String, String>,
}

impl SheetMap {
    pub fn new(names: BTreeMap<String, String>) -> Self {
        Self { names }
    }

    pub fn sheet_for<'a>(&'a self, page_key: &'a str) -> &'a str {
        self.names
            .get(page_key)
            .map(String::as_str)
            .unwrap_or(page_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_pages_use_their_key() {
        let map = SheetMap::new(BTreeMap::from([(
            "page1".to_string(),
            "Officers".to_string(),
        )]));
        assert_eq!(map.sheet_for("page1"), "Officers");
        assert_eq!(map.sheet_for("page2"), "page2");
    }
}
