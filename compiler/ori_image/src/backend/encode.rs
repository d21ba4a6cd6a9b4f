//! Byte images of function bodies and data initializers.
//!
//! Function bodies are encoded as a compact instruction stream; the
//! encoding only needs to be deterministic and to leave a pointer-sized
//! slot for every global operand. Data objects are laid out exactly as the
//! loader reads them. Global references become relocations against the
//! slot they occupy.

use ori_lir::{Constant, DataObject, DataType, FunctionBody, GlobalId, Operand, ScalarType};

/// Encoded bytes plus `(offset, target)` for every pointer slot.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Encoded {
    pub bytes: Vec<u8>,
    pub relocs: Vec<(u64, GlobalId)>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Encoder {
    pub pointer_size: u32,
    pub little_endian: bool,
}

impl Encoder {
    fn push_int(&self, out: &mut Vec<u8>, value: u64, width: usize) {
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        if self.little_endian {
            out.extend_from_slice(&bytes[..width]);
        } else {
            out.extend_from_slice(&bytes[8 - width..]);
        }
    }

    fn push_slot(&self, out: &mut Encoded, target: GlobalId) {
        out.relocs.push((out.bytes.len() as u64, target));
        out.bytes
            .resize(out.bytes.len() + self.pointer_size as usize, 0);
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "operand counts are bounded by the SmallVec inline size in practice"
    )]
    pub fn encode_body(&self, body: &FunctionBody) -> Encoded {
        let mut out = Encoded::default();
        for inst in body.instructions() {
            out.bytes.push(inst.opcode as u8);
            out.bytes.push(inst.operands.len() as u8);
            for operand in &inst.operands {
                match *operand {
                    Operand::Local(n) => {
                        out.bytes.push(0);
                        self.push_int(&mut out.bytes, u64::from(n), 4);
                    }
                    Operand::Imm(v) => {
                        out.bytes.push(1);
                        self.push_int(&mut out.bytes, v as u64, 8);
                    }
                    Operand::Block(n) => {
                        out.bytes.push(2);
                        self.push_int(&mut out.bytes, u64::from(n), 4);
                    }
                    Operand::Global(id) => {
                        out.bytes.push(3);
                        self.push_slot(&mut out, id);
                    }
                }
            }
        }
        if out.bytes.is_empty() {
            // Every function gets a distinct address.
            out.bytes.push(0);
        }
        out
    }

    fn encode_constant(&self, constant: &Constant, elem: Option<ScalarType>, out: &mut Encoded) {
        match constant {
            Constant::Zero => {
                let width = elem.map_or(0, |ty| ty.size(self.pointer_size)) as usize;
                out.bytes.resize(out.bytes.len() + width, 0);
            }
            Constant::Int { ty, value } => {
                let width = ty.size(self.pointer_size) as usize;
                self.push_int(&mut out.bytes, *value, width.min(8));
            }
            Constant::Bytes(bytes) => out.bytes.extend_from_slice(bytes),
            Constant::GlobalAddr(id) => self.push_slot(out, *id),
            Constant::Array(elems) => {
                for e in elems {
                    self.encode_constant(e, elem, out);
                }
            }
        }
    }

    /// Lay out an initialized data object, padded to the size of its type.
    pub fn encode_data(&self, data: &DataObject) -> Encoded {
        let mut out = Encoded::default();
        let elem = match &data.ty {
            DataType::Scalar(ty) | DataType::Array { elem: ty, .. } => Some(*ty),
            DataType::Bytes(_) => Some(ScalarType::I8),
        };
        if let Some(init) = &data.init {
            self.encode_constant(init, elem, &mut out);
        }
        let size = data.ty.size(self.pointer_size) as usize;
        if out.bytes.len() < size {
            out.bytes.resize(size, 0);
        }
        out
    }

    pub fn align_of(&self, data: &DataObject) -> u64 {
        if data.align > 0 {
            u64::from(data.align)
        } else {
            u64::from(data.ty.natural_align(self.pointer_size).max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use ori_lir::{Constant, DataObject, DataType, FunctionBody, GlobalId, ScalarType};
    use pretty_assertions::assert_eq;

    use super::Encoder;

    const LE64: Encoder = Encoder {
        pointer_size: 8,
        little_endian: true,
    };

    fn object(ty: DataType, init: Constant) -> DataObject {
        DataObject {
            ty,
            constant: true,
            align: 0,
            init: Some(init),
        }
    }

    #[test]
    fn u32_array_layout_little_endian() {
        let data = object(
            DataType::Array {
                elem: ScalarType::I32,
                len: 2,
            },
            Constant::u32_array([1, 0x0203]),
        );
        let enc = LE64.encode_data(&data);
        assert_eq!(enc.bytes, vec![1, 0, 0, 0, 3, 2, 0, 0]);
        assert!(enc.relocs.is_empty());
    }

    #[test]
    fn big_endian_ints() {
        let be = Encoder {
            pointer_size: 4,
            little_endian: false,
        };
        let data = object(
            DataType::Scalar(ScalarType::I32),
            Constant::Int {
                ty: ScalarType::I32,
                value: 0x0102_0304,
            },
        );
        assert_eq!(be.encode_data(&data).bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn address_tables_leave_pointer_slots() {
        let a = GlobalId::new(4);
        let b = GlobalId::new(9);
        let data = object(
            DataType::Array {
                elem: ScalarType::Ptr,
                len: 2,
            },
            Constant::address_table([a, b]),
        );
        let enc = LE64.encode_data(&data);
        assert_eq!(enc.bytes, vec![0; 16]);
        assert_eq!(enc.relocs, vec![(0, a), (8, b)]);
    }

    #[test]
    fn zero_fills_whole_type() {
        let data = object(
            DataType::Array {
                elem: ScalarType::Ptr,
                len: 3,
            },
            Constant::Zero,
        );
        assert_eq!(LE64.encode_data(&data).bytes.len(), 24);
    }

    #[test]
    fn body_global_operands_become_relocations() {
        let callee = GlobalId::new(2);
        let enc = LE64.encode_body(&FunctionBody::forwarding(callee, 0));
        assert_eq!(enc.relocs.len(), 1);
        let (offset, target) = enc.relocs[0];
        assert_eq!(target, callee);
        // opcode, operand count, operand tag
        assert_eq!(offset, 3);
    }

    #[test]
    fn empty_body_still_has_a_byte() {
        assert_eq!(LE64.encode_body(&FunctionBody::new(vec![])).bytes, vec![0]);
    }
}
