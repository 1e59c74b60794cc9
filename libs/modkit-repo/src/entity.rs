//! Entity contracts consumed by the type cache and repositories.

use std::any::TypeId;
use std::fmt;

use chrono::{DateTime, Utc};
use modkit_spec::{IntoValue, Record};

/// Default 64-bit integer identifier. Entities keyed by it also get the
/// single-parameter repository variant.
pub type LongId = i64;

/// Identifier types usable as entity keys.
pub trait EntityId: IntoValue + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl EntityId for i64 {}
impl EntityId for i32 {}
impl EntityId for u64 {}
impl EntityId for uuid::Uuid {}
impl EntityId for String {}

/// Capability flags recorded in the entity's type info.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Supports soft delete, see [`Disableable`].
    pub disableable: bool,
    /// Identifiers are generated by the application rather than the store.
    pub distributed_id: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        disableable: false,
        distributed_id: false,
    };
}

/// Domain entity managed through repositories.
///
/// ```rust,ignore
/// impl Entity for Order {
///     type Id = i64;
///     const CAPABILITIES: Capabilities = Capabilities { disableable: true, ..Capabilities::NONE };
///     fn id(&self) -> i64 { self.id }
/// }
/// ```
pub trait Entity: Record + Clone + Send + Sync + 'static {
    type Id: EntityId;

    /// Name of the identifier field, as seen by [`Record::field`].
    const ID_FIELD: &'static str = "id";

    /// Declared by hand. Set `disableable` exactly when the type implements
    /// [`Disableable`]; `disable_by` asserts it in debug builds.
    const CAPABILITIES: Capabilities = Capabilities::NONE;

    fn id(&self) -> Self::Id;
}

/// Soft-deletable entity. Disabling sets `is_disabled` and `disabled_at`
/// through [`Record::set_field`].
pub trait Disableable: Entity {
    fn is_disabled(&self) -> bool;

    fn disabled_at(&self) -> Option<DateTime<Utc>>;
}

/// Whether `E` is keyed by [`LongId`].
#[must_use]
pub fn has_long_id<E: Entity>() -> bool {
    TypeId::of::<E::Id>() == TypeId::of::<LongId>()
}
