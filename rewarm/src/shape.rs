// Copyright 2025 rewarm Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    any::type_name,
    collections::{BTreeMap, HashMap},
};

use serde::{Deserialize, Serialize};

/// Tag identifying the concrete Rust type of a payload or of its elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTag(String);

impl TypeTag {
    /// Tag for the type `T`.
    pub fn of<T: ?Sized>() -> Self {
        Self(type_name::<T>().to_string())
    }

    /// The tagged type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Generic container shape wrapping the elements of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    /// Growable sequence, e.g. `Vec<T>`.
    Sequence,
    /// Fixed-size array, e.g. `[T; N]`.
    FixedArray,
    /// Key-value map.
    Map,
}

/// Runtime shape of a payload.
///
/// Generic containers lose their element types once they round-trip through an
/// opaque byte store. The shape is derived when a record is constructed and
/// travels with the persisted envelope, so the engine can check on recovery
/// that the stored bytes rebuild the container they were taken from.
///
/// An empty container has no element to introspect; its shape is opaque (all
/// fields absent) and matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Shape {
    container: Option<ContainerKind>,
    element: Option<TypeTag>,
    key: Option<TypeTag>,
}

impl Shape {
    /// Shape of a scalar or plain object of type `T`.
    pub fn scalar<T: ?Sized>() -> Self {
        Self {
            container: None,
            element: Some(TypeTag::of::<T>()),
            key: None,
        }
    }

    /// Shape of a non-empty sequence with elements of type `T`.
    pub fn sequence<T: ?Sized>() -> Self {
        Self {
            container: Some(ContainerKind::Sequence),
            element: Some(TypeTag::of::<T>()),
            key: None,
        }
    }

    /// Shape of a non-empty fixed-size array with elements of type `T`.
    pub fn fixed_array<T: ?Sized>() -> Self {
        Self {
            container: Some(ContainerKind::FixedArray),
            element: Some(TypeTag::of::<T>()),
            key: None,
        }
    }

    /// Shape of a non-empty map with keys of type `K` and values of type `V`.
    pub fn map<K: ?Sized, V: ?Sized>() -> Self {
        Self {
            container: Some(ContainerKind::Map),
            element: Some(TypeTag::of::<V>()),
            key: Some(TypeTag::of::<K>()),
        }
    }

    /// Shape carrying no metadata at all.
    pub fn opaque() -> Self {
        Self::default()
    }

    /// Whether no metadata was recorded.
    pub fn is_opaque(&self) -> bool {
        self.container.is_none() && self.element.is_none() && self.key.is_none()
    }

    /// The container kind; absent for scalars and for empty containers.
    pub fn container(&self) -> Option<ContainerKind> {
        self.container
    }

    /// The element (or map value) type tag.
    pub fn element(&self) -> Option<&TypeTag> {
        self.element.as_ref()
    }

    /// The map key type tag, only present for [`ContainerKind::Map`].
    pub fn key(&self) -> Option<&TypeTag> {
        self.key.as_ref()
    }

    /// Whether bytes recorded under `self` may rebuild a value shaped like `other`.
    ///
    /// Opaque shapes carry no evidence either way and match anything.
    pub fn compatible_with(&self, other: &Shape) -> bool {
        if self.is_opaque() || other.is_opaque() {
            return true;
        }
        self == other
    }
}

/// Reports the runtime shape of a cacheable payload.
///
/// Implemented for the common container types and the scalar primitives. A
/// user payload type reports itself as a scalar:
///
/// ```
/// use rewarm::{Introspect, Shape};
///
/// struct Reading(f64);
///
/// impl Introspect for Reading {
///     fn shape(&self) -> Shape {
///         Shape::scalar::<Self>()
///     }
/// }
/// ```
///
/// The element tag of a non-empty container comes from the container's static
/// element type, so a heterogeneous container (e.g. of boxed trait objects)
/// records a single tag for all of its elements.
pub trait Introspect {
    /// Inspect the payload and report its shape.
    fn shape(&self) -> Shape;
}

impl<T: 'static> Introspect for Vec<T> {
    fn shape(&self) -> Shape {
        if self.is_empty() {
            Shape::opaque()
        } else {
            Shape::sequence::<T>()
        }
    }
}

impl<T: 'static, const N: usize> Introspect for [T; N] {
    fn shape(&self) -> Shape {
        if N == 0 {
            Shape::opaque()
        } else {
            Shape::fixed_array::<T>()
        }
    }
}

impl<K: 'static, V: 'static> Introspect for HashMap<K, V> {
    fn shape(&self) -> Shape {
        if self.is_empty() {
            Shape::opaque()
        } else {
            Shape::map::<K, V>()
        }
    }
}

impl<K: 'static, V: 'static> Introspect for BTreeMap<K, V> {
    fn shape(&self) -> Shape {
        if self.is_empty() {
            Shape::opaque()
        } else {
            Shape::map::<K, V>()
        }
    }
}

macro_rules! impl_introspect_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Introspect for $t {
                fn shape(&self) -> Shape {
                    Shape::scalar::<$t>()
                }
            }
        )*
    };
}

impl_introspect_scalar! {
    (), bool, char,
    f32, f64,
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    String,
}
