//! Layer merging.

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn overlay_replaces_leaves_and_keeps_siblings() {
        let mut base = parse("[bus]\nmessage_log_capacity = 1000\nevent_capacity = 1024\n");
        deep_merge(&mut base, &parse("[bus]\nmessage_log_capacity = 5\n"));

        assert_eq!(base["bus"]["message_log_capacity"].as_integer(), Some(5));
        assert_eq!(base["bus"]["event_capacity"].as_integer(), Some(1024));
    }

    #[test]
    fn arrays_are_replaced_not_appended() {
        let mut base = parse("[logging]\ndirectives = [\"a=debug\"]\n");
        deep_merge(&mut base, &parse("[logging]\ndirectives = [\"b=trace\"]\n"));
        let dirs = base["logging"]["directives"].as_array().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].as_str(), Some("b=trace"));
    }

    #[test]
    fn new_sections_are_inserted() {
        let mut base = parse("[bus]\nevent_capacity = 1\n");
        deep_merge(&mut base, &parse("[monitor]\nretention_secs = 9\n"));
        assert_eq!(base["monitor"]["retention_secs"].as_integer(), Some(9));
    }
}
