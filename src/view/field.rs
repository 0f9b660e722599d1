//! Form field markup.

use super::html::{escape, implode_attributes};
use crate::services::recaptcha;
use std::collections::HashMap;

/// Options for [`render_markup`].
#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    /// Preview text shown inside empty text fields.
    pub placeholder: String,
    pub name: String,
    pub value: String,
    /// `text`, `email`, `password`, `checkbox`, `radio`, `submit`, `hidden` or
    /// `invisibleRecaptcha`. Defaults to `text`.
    pub field_type: String,
    pub class: String,
    pub required: bool,
    pub pattern: String,
    pub label: String,
    /// Message shown under the field. Required fields get a default one.
    pub error: Option<String>,
}

impl FieldOptions {
    pub fn new(field_type: &str, name: &str) -> Self {
        Self {
            field_type: field_type.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Render an input wrapped in a `<div>`, with optional label and error text.
///
/// `recaptcha_public` is the site key used by `invisibleRecaptcha` fields.
pub fn render_markup(options: &FieldOptions, recaptcha_public: &str) -> String {
    let field_type = if options.field_type.is_empty() {
        "text"
    } else {
        options.field_type.as_str()
    };

    if field_type == "invisibleRecaptcha" {
        return recaptcha::render_invisible(recaptcha_public, &options.value, &options.class);
    }

    let name = if field_type == "submit" && options.name.is_empty() {
        "submit"
    } else {
        options.name.as_str()
    };

    let mut attributes = vec![
        ("placeholder", options.placeholder.clone()),
        ("name", name.to_string()),
        ("value", options.value.clone()),
        ("type", field_type.to_string()),
        ("class", options.class.clone()),
    ];
    if !options.pattern.is_empty() {
        attributes.push(("pattern", options.pattern.clone()));
    }

    let mut field = format!("<input {}", implode_attributes(&attributes));
    if options.required {
        field.push_str(" required");
    }
    field.push('>');

    if !options.label.is_empty() {
        field = format!("<label>{}{}</label>", escape(&options.label), field);
    }

    if options.required || options.error.is_some() {
        let message = options
            .error
            .as_deref()
            .unwrap_or("This field is required.");
        field.push_str(&format!("<small class=\"error\">{}</small>", escape(message)));
    }

    format!("<div>{}</div>", field)
}

/// The HTML-escaped submitted value for `var`, or `alt_default`.
pub fn default_value(submitted: &HashMap<String, String>, var: &str, alt_default: &str) -> String {
    escape(
        submitted
            .get(var)
            .map(String::as_str)
            .unwrap_or(alt_default),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_text_input_with_label_and_required_error() {
        let options = FieldOptions {
            label: "Email".into(),
            required: true,
            placeholder: "you@example.com".into(),
            ..FieldOptions::new("email", "email")
        };

        assert_eq!(
            render_markup(&options, ""),
            "<div><label>Email<input placeholder=\"you@example.com\" name=\"email\" value=\"\" \
             type=\"email\" class=\"\" required></label>\
             <small class=\"error\">This field is required.</small></div>"
        );
    }

    #[test]
    fn submit_defaults_name_and_type_defaults_to_text() {
        let submit = render_markup(&FieldOptions::new("submit", ""), "");
        assert!(submit.contains("name=\"submit\""));

        let text = render_markup(&FieldOptions::default(), "");
        assert!(text.contains("type=\"text\""));
        assert!(!text.contains("<small"));
    }

    #[test]
    fn custom_error_and_pattern() {
        let options = FieldOptions {
            pattern: "[0-9]+".into(),
            error: Some("Digits only".into()),
            ..FieldOptions::new("text", "zip")
        };
        let html = render_markup(&options, "");
        assert!(html.contains("pattern=\"[0-9]+\""));
        assert!(html.ends_with("<small class=\"error\">Digits only</small></div>"));
    }

    #[test]
    fn invisible_recaptcha_delegates() {
        let options = FieldOptions {
            value: "onSubmit".into(),
            ..FieldOptions::new("invisibleRecaptcha", "")
        };
        let html = render_markup(&options, "site-key");
        assert!(html.contains("data-sitekey=\"site-key\""));
        assert!(html.contains("data-callback=\"onSubmit\""));
    }

    #[test]
    fn default_value_prefers_submission_and_escapes() {
        let mut submitted = HashMap::new();
        submitted.insert("name".to_string(), "<b>Ada</b>".to_string());
        assert_eq!(default_value(&submitted, "name", "x"), "&lt;b&gt;Ada&lt;/b&gt;");
        assert_eq!(default_value(&submitted, "email", "none"), "none");
    }
}
