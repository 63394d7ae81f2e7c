//! Action forms
//!
//! Client-side validation and cascading choice lists for action parameters
//! and creation wizards. An invalid form is never submitted.

use crate::api::{param, ApiError, CloudClient, Params};
use crate::resources::first_text;
use log::debug;
use serde_json::Value;

pub const REQUIRED_MESSAGE: &str = "This field is required.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Integer { min: Option<i64>, max: Option<i64> },
    MaxLength(usize),
    /// Letters, digits and hyphens, starting with a letter.
    Name,
}

impl Rule {
    fn check(&self, value: &str) -> Result<(), String> {
        let value = value.trim();
        match *self {
            Rule::Required if value.is_empty() => Err(REQUIRED_MESSAGE.to_string()),
            Rule::Required => Ok(()),
            _ if value.is_empty() => Ok(()),
            Rule::Integer { min, max } => {
                let number: i64 = value
                    .parse()
                    .map_err(|_| "Please enter a whole number.".to_string())?;
                if let Some(min) = min.filter(|min| number < *min) {
                    return Err(format!("Must be at least {}.", min));
                }
                if let Some(max) = max.filter(|max| number > *max) {
                    return Err(format!("Must be at most {}.", max));
                }
                Ok(())
            }
            Rule::MaxLength(limit) if value.chars().count() > limit => {
                Err(format!("Must be at most {} characters.", limit))
            }
            Rule::MaxLength(_) => Ok(()),
            Rule::Name => {
                let starts_with_letter = value
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic())
                    .unwrap_or(false);
                let allowed = value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
                if starts_with_letter && allowed && !value.ends_with('-') {
                    Ok(())
                } else {
                    Err("Use letters, digits and hyphens, starting with a letter.".to_string())
                }
            }
        }
    }
}

/// The field whose selected value feeds a lookup's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub field: &'static str,
    pub param: &'static str,
}

/// Where a choice field gets its options from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub command: &'static str,
    pub list_key: &'static str,
    pub label_key: &'static str,
    pub params: &'static [(&'static str, &'static str)],
    pub depends_on: Option<Dependency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub rules: &'static [Rule],
    pub lookup: Option<Lookup>,
    pub secret: bool,
}

impl FieldSpec {
    pub const fn text(key: &'static str, label: &'static str, rules: &'static [Rule]) -> Self {
        Self {
            key,
            label,
            rules,
            lookup: None,
            secret: false,
        }
    }

    pub const fn password(key: &'static str, label: &'static str, rules: &'static [Rule]) -> Self {
        Self {
            key,
            label,
            rules,
            lookup: None,
            secret: true,
        }
    }

    pub const fn choice(
        key: &'static str,
        label: &'static str,
        lookup: Lookup,
        rules: &'static [Rule],
    ) -> Self {
        Self {
            key,
            label,
            rules,
            lookup: Some(lookup),
            secret: false,
        }
    }

    pub fn is_choice(&self) -> bool {
        self.lookup.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub spec: &'static FieldSpec,
    pub text: String,
    pub choices: Vec<Choice>,
    pub selected: usize,
    pub error: Option<String>,
}

impl Field {
    fn new(spec: &'static FieldSpec) -> Self {
        Self {
            spec,
            text: String::new(),
            choices: Vec::new(),
            selected: 0,
            error: None,
        }
    }

    /// Submitted value: the selected choice's id, or the typed text.
    pub fn value(&self) -> String {
        if self.spec.is_choice() {
            self.choices
                .get(self.selected)
                .map(|c| c.value.clone())
                .unwrap_or_default()
        } else if self.spec.secret {
            self.text.clone()
        } else {
            self.text.trim().to_string()
        }
    }

    /// Text shown in the form.
    pub fn display(&self) -> String {
        if self.spec.is_choice() {
            self.choices
                .get(self.selected)
                .map(|c| c.label.clone())
                .unwrap_or_default()
        } else if self.spec.secret {
            "*".repeat(self.text.chars().count())
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Form {
    pub title: String,
    fields: Vec<Field>,
    focus: usize,
}

impl Form {
    pub fn new(title: impl Into<String>, specs: &'static [FieldSpec]) -> Self {
        Self {
            title: title.into(),
            fields: specs.iter().map(Field::new).collect(),
            focus: 0,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.spec.key == key)
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn focused(&self) -> Option<&Field> {
        self.fields.get(self.focus)
    }

    pub fn focus_next(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn focus_previous(&mut self) {
        if !self.fields.is_empty() {
            self.focus = if self.focus == 0 {
                self.fields.len() - 1
            } else {
                self.focus - 1
            };
        }
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        if let Some(field) = self.fields.iter_mut().find(|f| f.spec.key == key) {
            field.text = value.to_string();
            field.error = None;
        }
    }

    /// Fills text fields from the entity being edited.
    pub fn prefill(&mut self, entity: &Value) {
        for field in self.fields.iter_mut().filter(|f| !f.spec.is_choice()) {
            match entity.get(field.spec.key) {
                Some(Value::String(s)) => field.text = s.clone(),
                Some(Value::Number(n)) => field.text = n.to_string(),
                _ => {}
            }
        }
    }

    pub fn push_char(&mut self, c: char) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            if !field.spec.is_choice() {
                field.text.push(c);
                field.error = None;
            }
        }
    }

    pub fn pop_char(&mut self) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            if !field.spec.is_choice() {
                field.text.pop();
                field.error = None;
            }
        }
    }

    /// Moves the focused choice field to its next or previous option.
    /// Returns the field index when the selection changed, so dependent
    /// lookups can be reloaded from there.
    pub fn cycle_choice(&mut self, forward: bool) -> Option<usize> {
        let field = self.fields.get_mut(self.focus)?;
        if !field.spec.is_choice() || field.choices.len() < 2 {
            return None;
        }
        let len = field.choices.len();
        field.selected = if forward {
            (field.selected + 1) % len
        } else {
            (field.selected + len - 1) % len
        };
        field.error = None;
        Some(self.focus)
    }

    /// Checks every field and records each failure on its field.
    pub fn validate(&mut self) -> bool {
        let mut valid = true;
        for field in &mut self.fields {
            let value = field.value();
            field.error = field
                .spec
                .rules
                .iter()
                .find_map(|rule| rule.check(&value).err());
            if field.error.is_some() {
                valid = false;
            }
        }
        if let Some(first_invalid) = self.fields.iter().position(|f| f.error.is_some()) {
            self.focus = first_invalid;
        }
        valid
    }

    pub fn is_valid(&self) -> bool {
        self.fields.iter().all(|f| f.error.is_none())
    }

    /// Request parameters for every field with a value.
    pub fn params(&self) -> Params {
        self.fields
            .iter()
            .map(|f| (f.spec.key, f.value()))
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| param(key, value))
            .collect()
    }

    pub fn value(&self, key: &str) -> String {
        self.field(key).map(Field::value).unwrap_or_default()
    }
}

/// Loads choice lists from field `from` onwards, one lookup at a time in
/// field order, so every dependent lookup sees its parent's selection.
pub async fn load_choices(
    client: &CloudClient,
    form: &mut Form,
    from: usize,
) -> Result<(), ApiError> {
    for index in from..form.fields.len() {
        let Some(lookup) = form.fields[index].spec.lookup else {
            continue;
        };

        let mut params: Params = lookup
            .params
            .iter()
            .map(|(key, value)| param(key, value))
            .collect();
        if let Some(dependency) = lookup.depends_on {
            let parent = form.value(dependency.field);
            if parent.is_empty() {
                let field = &mut form.fields[index];
                field.choices.clear();
                field.selected = 0;
                continue;
            }
            params.push(param(dependency.param, parent));
        }

        let envelope = client.execute(lookup.command, &params).await?;
        let choices: Vec<Choice> = envelope
            .get(lookup.list_key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| Choice {
                        value: first_text(item, &["id"]),
                        label: first_text(item, &[lookup.label_key, "name", "id"]),
                    })
                    .collect()
            })
            .unwrap_or_default();
        debug!(
            "Loaded {} choices for {}",
            choices.len(),
            form.fields[index].spec.key
        );

        let field = &mut form.fields[index];
        let previous = field.choices.get(field.selected).map(|c| c.value.clone());
        field.selected = previous
            .and_then(|value| choices.iter().position(|c| c.value == value))
            .unwrap_or(0);
        field.choices = choices;
    }
    Ok(())
}
