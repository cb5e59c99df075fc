//! Locale resolution from scenario tag sets.
//!
//! Three independent axes, one tag prefix each:
//!
//! - `@locale:` — region format (e.g. `de_DE`)
//! - `@language:` — UI language (e.g. `fr`)
//! - `@timezone:` — timezone (e.g. `Europe/Berlin`)
//!
//! Any subset may be present. Missing axes default from the region
//! profile named by the `@locale:` tag if one is known, else from the
//! resolver's global default profile. Resolution is total: every tag
//! set, including the empty set, yields a fully populated triple.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LOCALE_PREFIX: &str = "locale:";
const LANGUAGE_PREFIX: &str = "language:";
const TIMEZONE_PREFIX: &str = "timezone:";

/// Default values for one region format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleProfile {
    pub language: String,
    pub region_format: String,
    pub timezone: String,
}

/// Fully resolved (language, region format, timezone) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedLocale {
    pub language: String,
    pub region_format: String,
    pub timezone: String,
}

impl ResolvedLocale {
    /// Composite grouping key: stable, collision-free across distinct
    /// triples, and safe to use as a directory name. Components are
    /// escaped before joining with `.`, so neither the joiner nor the
    /// `/` to `-` timezone rewrite can be forged by component text.
    pub fn key(&self) -> String {
        format!(
            "{}.{}.{}",
            escape_component(&self.language),
            escape_component(&self.region_format),
            escape_component(&self.timezone)
        )
    }
}

/// Percent-escape `%`, `.`, and `-`, then rewrite `/` to `-`. Common
/// locale values pass through readable and unchanged.
fn escape_component(s: &str) -> String {
    s.replace('%', "%25")
        .replace('.', "%2E")
        .replace('-', "%2D")
        .replace('/', "-")
}

impl std::fmt::Display for ResolvedLocale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.language, self.region_format, self.timezone
        )
    }
}

/// Resolves tag sets to locale triples using region profiles.
#[derive(Debug, Clone)]
pub struct LocaleResolver {
    profiles: BTreeMap<String, LocaleProfile>,
    default_profile: LocaleProfile,
}

impl Default for LocaleResolver {
    fn default() -> Self {
        Self::new(builtin_profiles(), builtin_default())
    }
}

impl LocaleResolver {
    pub fn new(
        profiles: BTreeMap<String, LocaleProfile>,
        default_profile: LocaleProfile,
    ) -> Self {
        Self {
            profiles,
            default_profile,
        }
    }

    /// Built-in profiles with config-supplied overrides layered on top
    /// and an optional replacement default profile.
    pub fn with_overrides(
        overrides: BTreeMap<String, LocaleProfile>,
        default_profile: Option<LocaleProfile>,
    ) -> Self {
        let mut profiles = builtin_profiles();
        profiles.extend(overrides);
        Self::new(profiles, default_profile.unwrap_or_else(builtin_default))
    }

    /// Resolve a tag set into a full triple. Total over all inputs.
    pub fn resolve<I, S>(&self, tags: I) -> ResolvedLocale
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut region: Option<String> = None;
        let mut language: Option<String> = None;
        let mut timezone: Option<String> = None;

        // First occurrence of each axis wins.
        for tag in tags {
            let bare = tag.as_ref().trim_start_matches('@');
            if let Some(value) = strip_prefix_ci(bare, LOCALE_PREFIX) {
                region.get_or_insert_with(|| value.to_string());
            } else if let Some(value) = strip_prefix_ci(bare, LANGUAGE_PREFIX) {
                language.get_or_insert_with(|| value.to_string());
            } else if let Some(value) = strip_prefix_ci(bare, TIMEZONE_PREFIX) {
                timezone.get_or_insert_with(|| value.to_string());
            }
        }

        // Unset axes default from the named region profile when known,
        // else from the global default profile.
        let fallback = region
            .as_deref()
            .and_then(|r| self.profiles.get(r))
            .unwrap_or(&self.default_profile);

        ResolvedLocale {
            language: language.unwrap_or_else(|| fallback.language.clone()),
            region_format: region.unwrap_or_else(|| fallback.region_format.clone()),
            timezone: timezone.unwrap_or_else(|| fallback.timezone.clone()),
        }
    }
}

/// Case-insensitive prefix match preserving the value verbatim.
fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

fn builtin_default() -> LocaleProfile {
    LocaleProfile {
        language: "en".to_string(),
        region_format: "en_US".to_string(),
        timezone: "America/New_York".to_string(),
    }
}

fn builtin_profiles() -> BTreeMap<String, LocaleProfile> {
    let entries = [
        ("en_US", "en", "America/New_York"),
        ("de_DE", "de", "Europe/Berlin"),
        ("fr_FR", "fr", "Europe/Paris"),
        ("ja_JP", "ja", "Asia/Tokyo"),
        ("pt_BR", "pt", "America/Sao_Paulo"),
    ];
    entries
        .into_iter()
        .map(|(region, language, timezone)| {
            (
                region.to_string(),
                LocaleProfile {
                    language: language.to_string(),
                    region_format: region.to_string(),
                    timezone: timezone.to_string(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tags_yield_global_default() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(Vec::<&str>::new());
        assert_eq!(resolved.language, "en");
        assert_eq!(resolved.region_format, "en_US");
        assert_eq!(resolved.timezone, "America/New_York");
    }

    #[test]
    fn test_region_tag_fills_other_axes_from_profile() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(["@locale:de_DE"]);
        assert_eq!(resolved.language, "de");
        assert_eq!(resolved.region_format, "de_DE");
        assert_eq!(resolved.timezone, "Europe/Berlin");
    }

    #[test]
    fn test_explicit_language_overrides_profile() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(["@locale:de_DE", "@language:fr"]);
        assert_eq!(resolved.language, "fr");
        assert_eq!(resolved.region_format, "de_DE");
        assert_eq!(resolved.timezone, "Europe/Berlin");
    }

    #[test]
    fn test_all_three_axes_independent() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve([
            "@language:es",
            "@timezone:Europe/Madrid",
            "@locale:fr_FR",
            "@smoke",
        ]);
        assert_eq!(resolved.language, "es");
        assert_eq!(resolved.region_format, "fr_FR");
        assert_eq!(resolved.timezone, "Europe/Madrid");
    }

    #[test]
    fn test_unknown_region_keeps_raw_value_defaults_rest() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(["@locale:xx_YY"]);
        assert_eq!(resolved.region_format, "xx_YY");
        assert_eq!(resolved.language, "en");
        assert_eq!(resolved.timezone, "America/New_York");
    }

    #[test]
    fn test_first_occurrence_wins() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(["@language:ja", "@language:ko"]);
        assert_eq!(resolved.language, "ja");
    }

    #[test]
    fn test_prefix_case_insensitive_value_verbatim() {
        let resolver = LocaleResolver::default();
        let resolved = resolver.resolve(["@Timezone:Asia/Tokyo", "@LOCALE:de_DE"]);
        assert_eq!(resolved.timezone, "Asia/Tokyo");
        assert_eq!(resolved.region_format, "de_DE");
    }

    #[test]
    fn test_key_is_filesystem_safe() {
        let resolver = LocaleResolver::default();
        let key = resolver.resolve(["@locale:ja_JP"]).key();
        assert_eq!(key, "ja.ja_JP.Asia-Tokyo");
        assert!(!key.contains('/'));
    }

    #[test]
    fn test_key_distinct_when_component_text_could_collide() {
        // Separator characters inside a component must not let two
        // different triples share a key.
        let a = ResolvedLocale {
            language: "a.b".to_string(),
            region_format: "c".to_string(),
            timezone: "UTC".to_string(),
        };
        let b = ResolvedLocale {
            language: "a".to_string(),
            region_format: "b.c".to_string(),
            timezone: "UTC".to_string(),
        };
        assert_ne!(a.key(), b.key());

        let slash = ResolvedLocale {
            language: "en".to_string(),
            region_format: "en_US".to_string(),
            timezone: "Europe/Berlin".to_string(),
        };
        let dash = ResolvedLocale {
            timezone: "Europe-Berlin".to_string(),
            ..slash.clone()
        };
        assert_ne!(slash.key(), dash.key());
        assert!(!slash.key().contains('/'));
    }

    #[test]
    fn test_key_stable_across_raw_tag_variants() {
        let resolver = LocaleResolver::default();
        // Fully explicit vs. profile-derived: same triple, same key.
        let explicit = resolver.resolve([
            "@locale:de_DE",
            "@language:de",
            "@timezone:Europe/Berlin",
        ]);
        let derived = resolver.resolve(["@locale:de_DE"]);
        assert_eq!(explicit, derived);
        assert_eq!(explicit.key(), derived.key());
    }

    #[test]
    fn test_config_overrides_replace_builtin() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "de_DE".to_string(),
            LocaleProfile {
                language: "de".to_string(),
                region_format: "de_DE".to_string(),
                timezone: "Europe/Busingen".to_string(),
            },
        );
        let resolver = LocaleResolver::with_overrides(overrides, None);
        assert_eq!(
            resolver.resolve(["@locale:de_DE"]).timezone,
            "Europe/Busingen"
        );
        // Other built-ins untouched.
        assert_eq!(resolver.resolve(["@locale:fr_FR"]).language, "fr");
    }

    #[test]
    fn test_custom_default_profile() {
        let default = LocaleProfile {
            language: "en".to_string(),
            region_format: "en_GB".to_string(),
            timezone: "Europe/London".to_string(),
        };
        let resolver = LocaleResolver::with_overrides(BTreeMap::new(), Some(default));
        let resolved = resolver.resolve(Vec::<&str>::new());
        assert_eq!(resolved.region_format, "en_GB");
        assert_eq!(resolved.timezone, "Europe/London");
    }

    #[test]
    fn test_display_format() {
        let resolver = LocaleResolver::default();
        assert_eq!(
            resolver.resolve(["@locale:fr_FR"]).to_string(),
            "fr/fr_FR/Europe/Paris"
        );
    }
}
