/// Second-level cache settings of an entity or collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub access: AccessType,

    /// Region name; defaults to the entity name or collection role
    pub region: String,
}

/// Concurrency strategy of a cache region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Entries never change; updating a cached entity is an error
    ReadOnly,

    /// Entries are invalidated on update before the transaction completes
    ReadWrite,

    /// Entries are invalidated after the transaction completes, without
    /// locking
    NonstrictReadWrite,
}
