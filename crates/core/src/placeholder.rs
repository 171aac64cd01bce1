//! Placeholder expansion for process configs.
//!
//! User-supplied strings may contain placeholders of the form `{name}` or
//! `{name,key=value,...}`. Expansion is delegated to a [`Replacer`]; the
//! default [`TemplateReplacer`] substitutes registered templates whose
//! `{key}` variables are filled from the placeholder parameters and the
//! caller-provided variables.

use crate::process::ProcessConfig;
use std::collections::HashMap;

/// Expands one placeholder name in an input string.
pub trait Replacer: Send + Sync {
    /// Replace every occurrence of `placeholder` in `input`.
    ///
    /// `placeholder` may end in `*` to match a name prefix (`fs:*`). When
    /// `value` is empty, the replacement is looked up by the matched name;
    /// `vars`, `config`, and `section` are available to implementations
    /// that compute replacements from context.
    fn replace(
        &self,
        input: &str,
        placeholder: &str,
        value: &str,
        vars: &HashMap<String, String>,
        config: Option<&ProcessConfig>,
        section: &str,
    ) -> String;
}

/// Default replacer backed by a table of registered templates.
#[derive(Default)]
pub struct TemplateReplacer {
    templates: HashMap<String, String>,
}

impl TemplateReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the template substituted for `{name}`. The template may
    /// itself contain `{key}` variables filled from placeholder parameters
    /// and caller variables.
    pub fn register_template(&mut self, name: &str, template: &str) {
        self.templates.insert(name.to_string(), template.to_string());
    }
}

/// Split a placeholder body into its name and `key=value` parameters.
fn parse_body(body: &str) -> (&str, HashMap<String, String>) {
    let mut parts = body.split(',');
    let name = parts.next().unwrap_or_default();

    let mut params = HashMap::new();
    for part in parts {
        if let Some((key, value)) = part.split_once('=') {
            params.insert(key.to_string(), value.to_string());
        }
    }

    (name, params)
}

impl Replacer for TemplateReplacer {
    fn replace(
        &self,
        input: &str,
        placeholder: &str,
        value: &str,
        vars: &HashMap<String, String>,
        _config: Option<&ProcessConfig>,
        _section: &str,
    ) -> String {
        let Ok(matcher) = glob::Pattern::new(placeholder) else {
            return input.to_string();
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let end = start + len;

            let (name, params) = parse_body(&rest[start + 1..end]);

            if !matcher.matches(name) {
                out.push_str(&rest[..=end]);
                rest = &rest[end + 1..];
                continue;
            }

            let template = if !value.is_empty() {
                Some(value.to_string())
            } else {
                self.templates.get(name).cloned()
            };

            // An unknown placeholder stays in place.
            let Some(mut expansion) = template else {
                out.push_str(&rest[..=end]);
                rest = &rest[end + 1..];
                continue;
            };

            for (key, val) in params.iter().chain(vars.iter()) {
                expansion = expansion.replace(&format!("{{{key}}}"), val);
            }

            out.push_str(&rest[..start]);
            out.push_str(&expansion);
            rest = &rest[end + 1..];
        }

        out.push_str(rest);
        out
    }
}

/// Expand all placeholders in a working config, in place.
///
/// IO ids are expanded first because `{inputid}` and `{outputid}`
/// elsewhere refer to the expanded form.
pub(crate) fn resolve_placeholders(config: &mut ProcessConfig, replacer: &dyn Replacer) {
    let mut vars = HashMap::new();
    vars.insert("processid".to_string(), config.id.clone());
    vars.insert("reference".to_string(), config.reference.clone());

    let empty = HashMap::new();

    for i in 0..config.options.len() {
        let mut option = std::mem::take(&mut config.options[i]);

        option = replacer.replace(&option, "diskfs", "", &vars, Some(config), "global");
        option = replacer.replace(&option, "fs:*", "", &vars, Some(config), "global");

        config.options[i] = option;
    }

    for i in 0..config.input.len() {
        let mut input = std::mem::take(&mut config.input[i]);

        input.id = replacer.replace(&input.id, "processid", &config.id, &empty, None, "input");
        input.id = replacer.replace(&input.id, "reference", &config.reference, &empty, None, "input");

        vars.insert("inputid".to_string(), input.id.clone());

        input.address = replacer.replace(&input.address, "inputid", &input.id, &empty, None, "input");
        input.address = replacer.replace(&input.address, "processid", &config.id, &empty, None, "input");
        input.address =
            replacer.replace(&input.address, "reference", &config.reference, &empty, None, "input");
        input.address = replacer.replace(&input.address, "diskfs", "", &vars, Some(config), "input");
        input.address = replacer.replace(&input.address, "memfs", "", &vars, Some(config), "input");
        input.address = replacer.replace(&input.address, "fs:*", "", &vars, Some(config), "input");
        input.address = replacer.replace(&input.address, "rtmp", "", &vars, Some(config), "input");
        input.address = replacer.replace(&input.address, "srt", "", &vars, Some(config), "input");

        for option in input.options.iter_mut() {
            let mut value = std::mem::take(option);

            value = replacer.replace(&value, "inputid", &input.id, &empty, None, "input");
            value = replacer.replace(&value, "processid", &config.id, &empty, None, "input");
            value = replacer.replace(&value, "reference", &config.reference, &empty, None, "input");
            value = replacer.replace(&value, "diskfs", "", &vars, None, "input");
            value = replacer.replace(&value, "memfs", "", &vars, None, "input");
            value = replacer.replace(&value, "fs:*", "", &vars, None, "input");

            *option = value;
        }

        vars.remove("inputid");

        config.input[i] = input;
    }

    for i in 0..config.output.len() {
        let mut output = std::mem::take(&mut config.output[i]);

        output.id = replacer.replace(&output.id, "processid", &config.id, &empty, None, "output");
        output.id =
            replacer.replace(&output.id, "reference", &config.reference, &empty, None, "output");

        vars.insert("outputid".to_string(), output.id.clone());

        output.address =
            replacer.replace(&output.address, "outputid", &output.id, &empty, None, "output");
        output.address =
            replacer.replace(&output.address, "processid", &config.id, &empty, None, "output");
        output.address =
            replacer.replace(&output.address, "reference", &config.reference, &empty, None, "output");
        output.address = replacer.replace(&output.address, "diskfs", "", &vars, Some(config), "output");
        output.address = replacer.replace(&output.address, "memfs", "", &vars, Some(config), "output");
        output.address = replacer.replace(&output.address, "fs:*", "", &vars, Some(config), "output");
        output.address = replacer.replace(&output.address, "rtmp", "", &vars, Some(config), "output");
        output.address = replacer.replace(&output.address, "srt", "", &vars, Some(config), "output");

        for option in output.options.iter_mut() {
            let mut value = std::mem::take(option);

            value = replacer.replace(&value, "outputid", &output.id, &empty, None, "output");
            value = replacer.replace(&value, "processid", &config.id, &empty, None, "output");
            value = replacer.replace(&value, "reference", &config.reference, &empty, None, "output");
            value = replacer.replace(&value, "diskfs", "", &vars, None, "output");
            value = replacer.replace(&value, "memfs", "", &vars, None, "output");
            value = replacer.replace(&value, "fs:*", "", &vars, None, "output");

            *option = value;
        }

        for cleanup in output.cleanup.iter_mut() {
            let mut pattern = std::mem::take(&mut cleanup.pattern);

            pattern = replacer.replace(&pattern, "outputid", &output.id, &empty, None, "output");
            pattern = replacer.replace(&pattern, "processid", &config.id, &empty, None, "output");
            pattern = replacer.replace(&pattern, "reference", &config.reference, &empty, None, "output");

            cleanup.pattern = pattern;
        }

        vars.remove("outputid");

        config.output[i] = output;
    }
}
