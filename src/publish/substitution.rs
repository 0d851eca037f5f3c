use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\$(\$)?\{([^}]+)\}").ok());

/// Replace `${NAME}` with the value of `NAME` from `environment`.
///
/// `$${NAME}` produces a literal `${NAME}`. Unknown names are left as written.
pub fn substitute(text: &str, environment: &HashMap<String, String>) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[2];
        if caps.get(1).is_some() {
            return format!("${{{name}}}");
        }
        match environment.get(name) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}
