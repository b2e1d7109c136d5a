pub mod joined;
pub mod mapping;
pub mod metadata;
pub mod single_table;
pub mod topology;
pub mod union;

pub use mapping::{
    CacheLayout, CascadeStyle, ColumnMapping, ColumnSource, CustomSql, DiscriminatorMapping,
    DiscriminatorSource, EntityMapping, FetchMode, IdGeneration, IdentifierMapping,
    InheritanceKind, NaturalIdMapping, OptimisticLockStyle, PropertyKind, PropertyMapping,
    SubclassMapping, TableMapping, ValueGeneration, VersionMapping,
};
pub use metadata::{
    ColumnMetadata, EntityMetadata, IdentifierMetadata, NaturalIdMetadata, PropertyMetadata,
    Selectable, VersionMetadata,
};
pub use topology::{Hierarchy, JoinKind, TableInfo, TableTopology};
