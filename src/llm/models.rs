//! Selectable chat models

/// A model the user can pick in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDef {
    /// Identifier sent on the wire
    pub id: &'static str,
    /// Short label shown next to generated messages
    pub label: &'static str,
}

const MODELS: &[ModelDef] = &[
    ModelDef {
        id: "gpt-4o",
        label: "GPT 4o",
    },
    ModelDef {
        id: "gpt-3.5-turbo",
        label: "GPT 3.5T",
    },
];

/// All selectable models, default first
pub fn all_models() -> &'static [ModelDef] {
    MODELS
}

pub fn default_model() -> &'static ModelDef {
    &MODELS[0]
}

pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    MODELS.iter().find(|m| m.id == id)
}

/// Display label for a model id, if it is one we know
pub fn label_for(id: &str) -> Option<&'static str> {
    find_model(id).map(|m| m.label)
}
