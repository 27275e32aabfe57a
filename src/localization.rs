use anyhow::Result;
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{error, warn};
use unic_langid::LanguageIdentifier;

/// Languages with a message catalogue, the first one is the fallback
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "fr"];

const DEFAULT_LANGUAGE: &str = "en";

fn catalogue(language: &str) -> &'static str {
    match language {
        "fr" => include_str!("../locales/fr/main.ftl"),
        _ => include_str!("../locales/en/main.ftl"),
    }
}

/// Localization manager for the bordering bot
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a new localization manager with every supported language loaded
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();

        for language in SUPPORTED_LANGUAGES {
            let locale: LanguageIdentifier = language.parse()?;
            let bundle = Self::create_bundle(&locale, catalogue(language))?;
            bundles.insert(language.to_string(), bundle);
        }

        Ok(Self { bundles })
    }

    /// A manager without catalogues, every lookup reports a missing translation
    pub fn empty() -> Self {
        Self {
            bundles: HashMap::new(),
        }
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(
        locale: &LanguageIdentifier,
        source: &str,
    ) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Messages go to chat clients, no bidi isolation marks around arguments
        bundle.set_use_isolating(false);

        let resource = match FluentResource::try_new(source.to_string()) {
            Ok(resource) => resource,
            Err((resource, errors)) => {
                warn!(locale = %locale, errors = ?errors, "Message catalogue has syntax errors");
                resource
            }
        };
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow::anyhow!("Failed to load {locale} catalogue: {errors:?}"))?;

        Ok(bundle)
    }

    /// Get a localized message, falling back to English for unknown languages
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {key}"),
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {key}"),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            warn!(key, errors = ?errors, "Message formatted with errors");
        }
        value.into_owned()
    }
}

/// Map a client language tag such as `fr-CA` to a supported language
pub fn detect_language(language_code: Option<&str>) -> &'static str {
    let primary = language_code
        .and_then(|code| code.split(['-', '_']).next())
        .map(|code| code.to_ascii_lowercase());

    match primary {
        Some(primary) => SUPPORTED_LANGUAGES
            .iter()
            .copied()
            .find(|language| *language == primary)
            .unwrap_or(DEFAULT_LANGUAGE),
        None => DEFAULT_LANGUAGE,
    }
}

/// Global localization instance
static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> =
    LazyLock::new(|| match LocalizationManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Failed to load message catalogues");
            LocalizationManager::empty()
        }
    });

/// Get a localized message for the user's language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    LOCALIZATION_MANAGER.get_message_in_language(key, detect_language(language_code), None)
}

/// Get a localized message with arguments for the user's language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
    LOCALIZATION_MANAGER.get_message_in_language(
        key,
        detect_language(language_code),
        Some(&args_map),
    )
}
