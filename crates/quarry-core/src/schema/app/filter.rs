use super::{AttributeId, FetchStyle};
use crate::stmt::Type;

/// Name of the filter enabled for sessions opened with a tenant identifier.
pub const TENANT_FILTER: &str = "quarry.tenant";

/// Name of the tenant filter's single parameter.
pub const TENANT_PARAM: &str = "tenantId";

/// A named, parameterized restriction that sessions can enable.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub params: Vec<(String, Type)>,

    /// Condition used by entities that reference the filter without their own
    pub default_condition: Option<String>,
}

/// An entity's use of a filter.
#[derive(Debug, Clone)]
pub struct EntityFilter {
    pub name: String,

    /// Condition in query-language syntax; attribute names are unqualified
    pub condition: String,
}

/// A named set of fetch overrides, enabled per session.
#[derive(Debug, Clone)]
pub struct FetchProfile {
    pub name: String,
    pub items: Vec<FetchProfileItem>,
}

#[derive(Debug, Clone)]
pub struct FetchProfileItem {
    pub attribute: AttributeId,
    pub style: FetchStyle,
}

impl Filter {
    pub fn param_ty(&self, name: &str) -> Option<&Type> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, ty)| ty)
    }
}

impl FetchProfile {
    pub fn item(&self, attribute: AttributeId) -> Option<&FetchProfileItem> {
        self.items.iter().find(|item| item.attribute == attribute)
    }
}
