//! The plugin's self-description, sent in reply to `getmanifest`.

use serde::Serialize;

/// Everything the node needs to know to wire this plugin in.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub options: Vec<OptionSpec>,
    pub rpcmethods: Vec<RpcMethodSpec>,
    pub subscriptions: Vec<String>,
    pub hooks: Vec<String>,
    /// `"true"` if the node may stop and restart this plugin at will.
    /// The node expects the string form, not a bool.
    pub dynamic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcMethodSpec {
    pub name: String,
    /// Parameter summary gathered by the startup usage probe.
    pub usage: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
}

impl Manifest {
    pub fn dynamic_flag(restartable: bool) -> String {
        if restartable { "true" } else { "false" }.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_the_member_set_the_node_expects() {
        let manifest = Manifest {
            options: vec![OptionSpec {
                name: "greeting".into(),
                value_type: "string".into(),
                description: "what to say".into(),
            }],
            rpcmethods: vec![RpcMethodSpec {
                name: "hello".into(),
                usage: "[name]".into(),
                description: "greet".into(),
                long_description: None,
            }],
            subscriptions: vec!["connect".into()],
            hooks: vec![],
            dynamic: Manifest::dynamic_flag(false),
        };
        let v = serde_json::to_value(&manifest).unwrap();
        assert_eq!(v["options"][0]["type"], json!("string"));
        assert_eq!(v["rpcmethods"][0]["usage"], json!("[name]"));
        assert!(v["rpcmethods"][0].get("long_description").is_none());
        assert_eq!(v["dynamic"], json!("false"));
    }
}
