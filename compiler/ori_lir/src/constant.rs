//! Constant initializers for data objects.

use serde::{Deserialize, Serialize};

use crate::global::GlobalId;
use crate::types::ScalarType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    /// The all-zero value of the enclosing data type.
    Zero,
    Int { ty: ScalarType, value: u64 },
    Bytes(Vec<u8>),
    /// Address of another global (pointer-sized).
    GlobalAddr(GlobalId),
    Array(Vec<Constant>),
}

impl Constant {
    /// An array of 32-bit integers.
    pub fn u32_array(values: impl IntoIterator<Item = u32>) -> Self {
        Self::Array(
            values
                .into_iter()
                .map(|value| Self::Int {
                    ty: ScalarType::I32,
                    value: u64::from(value),
                })
                .collect(),
        )
    }

    /// An array of addresses of the given globals.
    pub fn address_table(ids: impl IntoIterator<Item = GlobalId>) -> Self {
        Self::Array(ids.into_iter().map(Self::GlobalAddr).collect())
    }

    pub fn for_each_global(&self, f: &mut impl FnMut(GlobalId)) {
        match self {
            Self::Zero | Self::Int { .. } | Self::Bytes(_) => {}
            Self::GlobalAddr(id) => f(*id),
            Self::Array(elems) => {
                for elem in elems {
                    elem.for_each_global(f);
                }
            }
        }
    }

    /// Apply `map` to every global address, returning how many changed.
    pub fn remap(&mut self, map: &mut impl FnMut(GlobalId) -> GlobalId) -> usize {
        match self {
            Self::Zero | Self::Int { .. } | Self::Bytes(_) => 0,
            Self::GlobalAddr(id) => {
                let next = map(*id);
                let changed = usize::from(next != *id);
                *id = next;
                changed
            }
            Self::Array(elems) => elems.iter_mut().map(|elem| elem.remap(map)).sum(),
        }
    }
}
