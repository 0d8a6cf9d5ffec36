use serde_json::{json, Value};

/// One reflected parameter, as `__get_methods__` reports it.
#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: String,
    pub required: bool,
    pub type_hint: String,
}

/// What `__get_methods__` reports for one exposed command.
#[derive(Debug, Clone, Default)]
pub struct MethodMeta {
    pub params: Vec<ParamMeta>,
    pub doc: String,
}

impl MethodMeta {
    pub fn to_json(&self) -> Value {
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "required": p.required,
                    "type": p.type_hint,
                })
            })
            .collect();
        json!({ "params": params, "doc": self.doc })
    }
}
