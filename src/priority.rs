use std::collections::HashMap;

/// Maps priority-class name to its integer priority, as owned by a [`Round`](crate::round::Round)
/// for the lifetime of one scheduling invocation.
///
/// A class name absent from the catalogue resolves to priority `0` rather than an
/// error — scheduling-key derivation and reporting both need a total function over
/// whatever class string a job handle reports, including ones the catalogue was
/// never told about.
#[derive(Debug, Clone, Default)]
pub struct PriorityClassCatalogue {
    priorities: HashMap<String, i32>,
    default_class: String,
}

impl PriorityClassCatalogue {
    pub fn new(default_class: impl Into<String>) -> Self {
        Self {
            priorities: HashMap::new(),
            default_class: default_class.into(),
        }
    }

    pub fn with_class(mut self, name: impl Into<String>, priority: i32) -> Self {
        self.priorities.insert(name.into(), priority);
        self
    }

    pub fn priority_of(&self, class: &str) -> i32 {
        self.priorities.get(class).copied().unwrap_or(0)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.priorities.contains_key(class)
    }

    pub fn default_class(&self) -> &str {
        &self.default_class
    }
}
