//! Thing Description data structures
//!
//! A Thing Description, or `TD`, stores the semantic metadata and the interface descriptions of
//! a physical or virtual entity, called `Thing`.
//!
//! The model only keeps what a client needs in order to interact with a Thing: its
//! [Interaction Affordances] and the [Form]s describing how to reach them. Missing affordance
//! collections deserialize as empty maps.
//!
//! [Interaction Affordances]: https://www.w3.org/TR/wot-thing-description/#interactionaffordance

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_with::{serde_as, skip_serializing_none, DeserializeAs, OneOrMany, Same, VecSkipError};
use time::OffsetDateTime;

use crate::protocol::{coap, http};

pub const TD_CONTEXT_10: &str = "https://www.w3.org/2019/wot/td/v1";
pub const TD_CONTEXT_11: &str = "https://www.w3.org/2019/wot/td/v1.1";

/// Content type used by forms that do not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// An abstraction of a physical or a virtual entity
///
/// Fetched once from the directory and never mutated afterwards.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingDescription {
    /// A [JSON-LD @context](https://www.w3.org/TR/json-ld11/#the-context)
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,

    /// A unique identifier
    pub id: Option<String>,

    /// JSON-LD semantic keywords
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    /// Human-readable title to be displayed
    #[serde(default)]
    pub title: String,

    /// Human-readable additional information
    pub description: Option<String>,

    /// Time of creation of this description
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created: Option<OffsetDateTime>,

    /// Time of last update of this description
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub modified: Option<OffsetDateTime>,

    /// Base URI to be used to resolve all the other relative URIs
    pub base: Option<String>,

    /// Property-based Interaction Affordances
    #[serde(default)]
    pub properties: HashMap<String, PropertyAffordance>,

    /// Action-based Interaction Affordances
    #[serde(default)]
    pub actions: HashMap<String, ActionAffordance>,

    /// Event-based Interaction Affordances
    #[serde(default)]
    pub events: HashMap<String, EventAffordance>,

    /// Thing-wide Security constraints
    #[serde(default)]
    #[serde_as(as = "OneOrMany<_>")]
    pub security: Vec<String>,

    /// Security definitions, kept verbatim
    #[serde(default)]
    pub security_definitions: HashMap<String, Value>,
}

fn default_context() -> Value {
    TD_CONTEXT_11.into()
}

impl ThingDescription {
    /// Returns true if the Thing describes an action named `name`
    #[inline]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// The interaction fields of the affordance of type `ty` named `name`, if any
    pub fn interaction(&self, ty: AffordanceType, name: &str) -> Option<&InteractionAffordance> {
        match ty {
            AffordanceType::Property => self.properties.get(name).map(|a| &a.interaction),
            AffordanceType::Action => self.actions.get(name).map(|a| &a.interaction),
            AffordanceType::Event => self.events.get(name).map(|a| &a.interaction),
        }
    }
}

/// The kind of an Interaction Affordance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffordanceType {
    /// A property affordance
    Property,

    /// An action affordance
    Action,

    /// An event affordance
    Event,
}

impl fmt::Display for AffordanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Property => "property",
            Self::Action => "action",
            Self::Event => "event",
        };

        f.write_str(s)
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionAffordance {
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    pub title: Option<String>,

    pub description: Option<String>,

    /// Endpoints, in priority order. Malformed forms are skipped.
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub forms: Vec<Form>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PropertyAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    pub observable: Option<bool>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ActionAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    /// Schema of the data expected when invoking the action
    pub input: Option<Value>,

    pub output: Option<Value>,

    #[serde(default)]
    pub safe: bool,

    #[serde(default)]
    pub idempotent: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EventAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    pub subscription: Option<Value>,

    pub data: Option<Value>,

    pub cancellation: Option<Value>,
}

/// An endpoint descriptor for one interaction
///
/// A form without an `href` is kept by deserialization and discarded later on by the
/// [FormSelector](crate::form::FormSelector).
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(default)]
    pub op: DefaultedFormOperations,

    pub href: Option<String>,

    pub content_type: Option<String>,

    pub subprotocol: Option<String>,

    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub security: Option<Vec<String>>,

    /// HTTP binding method override
    #[serde(rename = "htv:methodName")]
    pub http_method: Option<http::Method>,

    /// CoAP binding method override
    #[serde(rename = "cov:method")]
    pub coap_method: Option<coap::Method>,
}

impl Form {
    /// The declared content type or [DEFAULT_CONTENT_TYPE]
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormOperation {
    ReadProperty,
    WriteProperty,
    ObserveProperty,
    UnobserveProperty,
    InvokeAction,
    QueryAction,
    CancelAction,
    SubscribeEvent,
    UnsubscribeEvent,
    ReadAllProperties,
    WriteAllProperties,
    ReadMultipleProperties,
    WriteMultipleProperties,
    ObserveAllProperties,
    UnobserveAllProperties,
    SubscribeAllEvents,
    UnsubscribeAllEvents,
    QueryAllActions,
}

impl fmt::Display for FormOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadProperty => "readproperty",
            Self::WriteProperty => "writeproperty",
            Self::ObserveProperty => "observeproperty",
            Self::UnobserveProperty => "unobserveproperty",
            Self::InvokeAction => "invokeaction",
            Self::QueryAction => "queryaction",
            Self::CancelAction => "cancelaction",
            Self::SubscribeEvent => "subscribeevent",
            Self::UnsubscribeEvent => "unsubscribeevent",
            Self::ReadAllProperties => "readallproperties",
            Self::WriteAllProperties => "writeallproperties",
            Self::ReadMultipleProperties => "readmultipleproperties",
            Self::WriteMultipleProperties => "writemultipleproperties",
            Self::ObserveAllProperties => "observeallproperties",
            Self::UnobserveAllProperties => "unobserveallproperties",
            Self::SubscribeAllEvents => "subscribeallevents",
            Self::UnsubscribeAllEvents => "unsubscribeallevents",
            Self::QueryAllActions => "queryallactions",
        };

        f.write_str(s)
    }
}

/// Operations of a form, implied by the affordance when not declared
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DefaultedFormOperations {
    #[default]
    Default,
    Custom(Vec<FormOperation>),
}

impl fmt::Display for DefaultedFormOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Custom(ops) => {
                let mut first = true;
                for op in ops {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    fmt::Display::fmt(op, f)?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for DefaultedFormOperations {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Default => serializer.serialize_none(),
            Self::Custom(ops) if ops.is_empty() => serializer.serialize_none(),
            Self::Custom(ops) => ops.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DefaultedFormOperations
where
    OneOrMany<Same>: DeserializeAs<'de, Vec<FormOperation>>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ops = Option::<OneOrMany<_>>::deserialize_as(deserializer)?;
        Ok(ops.map(Self::Custom).unwrap_or(Self::Default))
    }
}
