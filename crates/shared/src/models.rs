//! Object kinds, primary keys and notification actions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Every object kind the server can list, get, or push notifications for.
///
/// The kind doubles as the method namespace (`node.list`) and as the `name`
/// field of notify frames, so parsing an unknown string fails instead of
/// silently routing to nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Node,
    Machine,
    Device,
    Controller,
    Pod,
    Subnet,
    Vlan,
    Fabric,
    Space,
    Domain,
    Zone,
    Tag,
    User,
    Event,
    #[serde(rename = "noderesult")]
    NodeResult,
    Discovery,
    Service,
    Script,
    #[serde(rename = "packagerepository")]
    PackageRepository,
    #[serde(rename = "dhcpsnippet")]
    DhcpSnippet,
    #[serde(rename = "bootresource")]
    BootResource,
    Notification,
    Config,
}

impl ObjectKind {
    pub const ALL: &'static [ObjectKind] = &[
        ObjectKind::Node,
        ObjectKind::Machine,
        ObjectKind::Device,
        ObjectKind::Controller,
        ObjectKind::Pod,
        ObjectKind::Subnet,
        ObjectKind::Vlan,
        ObjectKind::Fabric,
        ObjectKind::Space,
        ObjectKind::Domain,
        ObjectKind::Zone,
        ObjectKind::Tag,
        ObjectKind::User,
        ObjectKind::Event,
        ObjectKind::NodeResult,
        ObjectKind::Discovery,
        ObjectKind::Service,
        ObjectKind::Script,
        ObjectKind::PackageRepository,
        ObjectKind::DhcpSnippet,
        ObjectKind::BootResource,
        ObjectKind::Notification,
        ObjectKind::Config,
    ];

    /// Wire name of the kind, as used in method names and notify frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Node => "node",
            ObjectKind::Machine => "machine",
            ObjectKind::Device => "device",
            ObjectKind::Controller => "controller",
            ObjectKind::Pod => "pod",
            ObjectKind::Subnet => "subnet",
            ObjectKind::Vlan => "vlan",
            ObjectKind::Fabric => "fabric",
            ObjectKind::Space => "space",
            ObjectKind::Domain => "domain",
            ObjectKind::Zone => "zone",
            ObjectKind::Tag => "tag",
            ObjectKind::User => "user",
            ObjectKind::Event => "event",
            ObjectKind::NodeResult => "noderesult",
            ObjectKind::Discovery => "discovery",
            ObjectKind::Service => "service",
            ObjectKind::Script => "script",
            ObjectKind::PackageRepository => "packagerepository",
            ObjectKind::DhcpSnippet => "dhcpsnippet",
            ObjectKind::BootResource => "bootresource",
            ObjectKind::Notification => "notification",
            ObjectKind::Config => "config",
        }
    }

    /// Build a `<kind>.<verb>` method name.
    pub fn method(&self, verb: &str) -> String {
        format!("{}.{}", self.as_str(), verb)
    }

    /// Field holding the primary key of objects of this kind.
    pub fn default_pk_field(&self) -> &'static str {
        match self {
            ObjectKind::Node
            | ObjectKind::Machine
            | ObjectKind::Device
            | ObjectKind::Controller => "system_id",
            _ => "id",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// What happened to the object a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Update => f.write_str("update"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

/// A hashable primary key.
///
/// Kinds key their objects by an integer `id` or by a string such as a
/// node's `system_id`; both shapes compare and hash by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pk {
    Int(i64),
    Str(String),
}

impl Pk {
    /// Interpret a JSON scalar as a primary key. Floats, objects, arrays,
    /// booleans and null are not keys.
    pub fn from_value(value: &Value) -> Option<Pk> {
        match value {
            Value::Number(n) => n.as_i64().map(Pk::Int),
            Value::String(s) => Some(Pk::Str(s.clone())),
            _ => None,
        }
    }

    /// Read the key stored under `field` of an object.
    pub fn from_field(data: &Value, field: &str) -> Option<Pk> {
        data.get(field).and_then(Pk::from_value)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Pk::Int(i) => Value::from(*i),
            Pk::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pk::Int(i) => write!(f, "{}", i),
            Pk::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Pk {
    fn from(value: i64) -> Self {
        Pk::Int(value)
    }
}

impl From<&str> for Pk {
    fn from(value: &str) -> Self {
        Pk::Str(value.to_string())
    }
}

impl From<String> for Pk {
    fn from(value: String) -> Self {
        Pk::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_round_trips_through_its_wire_name() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind.as_str().parse::<ObjectKind>().ok(), Some(*kind));
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "nodes".parse::<ObjectKind>().unwrap_err();
        assert_eq!(err, ProtocolError::UnknownKind("nodes".to_string()));
    }

    #[test]
    fn method_names_are_namespaced_by_kind() {
        assert_eq!(ObjectKind::NodeResult.method("clear"), "noderesult.clear");
        assert_eq!(ObjectKind::Domain.method("list"), "domain.list");
    }

    #[test]
    fn nodes_are_keyed_by_system_id() {
        assert_eq!(ObjectKind::Machine.default_pk_field(), "system_id");
        assert_eq!(ObjectKind::Subnet.default_pk_field(), "id");
    }

    #[test]
    fn pk_accepts_integers_and_strings_only() {
        assert_eq!(Pk::from_value(&json!(7)), Some(Pk::Int(7)));
        assert_eq!(Pk::from_value(&json!("4y3h7n")), Some(Pk::from("4y3h7n")));
        assert_eq!(Pk::from_value(&json!(1.5)), None);
        assert_eq!(Pk::from_value(&json!(null)), None);
        assert_eq!(
            Pk::from_field(&json!({"system_id": "abc"}), "system_id"),
            Some(Pk::from("abc"))
        );
    }
}
