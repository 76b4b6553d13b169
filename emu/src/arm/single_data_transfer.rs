//! # Word and unsigned byte load/store
//!
//! Second-level decode for the 01x class. Bit 25 selects between a 12-bit
//! immediate offset and an immediate-shifted register offset, bit 22 the
//! transfer width, bit 20 the direction:
//!
//! ```text
//! ┌───────┬──────────────┬──────────────────────────────────┐
//! │ Form  │ P/W bits     │ Instruction                      │
//! ├───────┼──────────────┼──────────────────────────────────┤
//! │ plain │ P=1 or W=0   │ LDR, STR, LDRB, STRB             │
//! │ T     │ P=0, W=1     │ LDRT, STRT, LDRBT, STRBT         │
//! │ lit.  │ Rn=15, load  │ LDR/LDRB from the aligned pc     │
//! └───────┴──────────────┴──────────────────────────────────┘
//! ```
//!
//! A word load into the program counter is the one place this class
//! branches; the executor reports `None` so the dispatcher leaves the
//! program counter alone. Register-offset encodings with bit 4 set belong
//! to the media space, which the hypervisor never traps.

use crate::arm::addressing::{
    AddressingMode, LoadStoreKind, Offsetting, ReadWriteKind, align, has_writeback,
};
use crate::arm::alu::{ShiftKind, decode_imm_shift, shift};
use crate::arm::emulate::{EmulateError, SIZE_OF_INSTRUCTION, condition_passed, unpredictable};
use crate::bitwise::Bits;
use crate::vcpu::{GuestFault, REG_PROGRAM_COUNTER, Vcpu};

/// The offset operand of a 01x transfer: a 12-bit immediate or an
/// immediate-shifted register.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum TransferOffset {
    Immediate { offset: u32 },
    Register { rm: u32, kind: ShiftKind, amount: u32 },
}

impl From<u32> for TransferOffset {
    fn from(instruction: u32) -> Self {
        if instruction.is_bit_on(25) {
            let (kind, amount) =
                decode_imm_shift(instruction.get_bits(5..=6), instruction.get_bits(7..=11));
            Self::Register {
                rm: instruction.get_bits(0..=3),
                kind,
                amount,
            }
        } else {
            Self::Immediate {
                offset: instruction.get_bits(0..=11),
            }
        }
    }
}

impl TransferOffset {
    fn is_register(self) -> bool {
        matches!(self, Self::Register { .. })
    }

    /// Whether the offset is read out of `register`.
    fn uses(self, register: u32) -> bool {
        matches!(self, Self::Register { rm, .. } if rm == register)
    }

    /// The shifter runs at execution time because the carry-in comes from
    /// the live CPSR.
    fn value(self, vcpu: &impl Vcpu) -> u32 {
        match self {
            Self::Immediate { offset } => offset,
            Self::Register { rm, kind, amount } => {
                shift(kind, amount, vcpu.register_at(rm), vcpu.cpsr().carry_flag()).result
            }
        }
    }
}

/// A decoded 01x-class instruction, one variant per form.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum SingleDataTransfer {
    Load {
        width: ReadWriteKind,
        rn: u32,
        rt: u32,
        offset: TransferOffset,
        mode: AddressingMode,
        wback: bool,
    },
    LoadLiteral {
        width: ReadWriteKind,
        rt: u32,
        offset: u32,
        offsetting: Offsetting,
    },
    Store {
        width: ReadWriteKind,
        rn: u32,
        rt: u32,
        offset: TransferOffset,
        mode: AddressingMode,
        wback: bool,
    },
    LoadTranslated {
        width: ReadWriteKind,
        rn: u32,
        rt: u32,
        offset: TransferOffset,
        offsetting: Offsetting,
    },
    StoreTranslated {
        width: ReadWriteKind,
        rn: u32,
        rt: u32,
        offset: TransferOffset,
        offsetting: Offsetting,
    },
    Unpredictable {
        what: &'static str,
    },
}

impl From<u32> for SingleDataTransfer {
    fn from(instruction: u32) -> Self {
        if instruction.is_bit_on(25) && instruction.is_bit_on(4) {
            return Self::Unpredictable {
                what: "media instruction",
            };
        }

        let kind = LoadStoreKind::from(instruction.is_bit_on(20));
        let width = ReadWriteKind::from(instruction.is_bit_on(22));
        let translated = instruction.is_bit_off(24) && instruction.is_bit_on(21);
        let rn = instruction.get_bits(16..=19);
        let rt = instruction.get_bits(12..=15);
        let offset = TransferOffset::from(instruction);
        let mode = AddressingMode::from_instruction(instruction);

        match kind {
            LoadStoreKind::Load if translated => Self::LoadTranslated {
                width,
                rn,
                rt,
                offset,
                offsetting: mode.offsetting,
            },
            LoadStoreKind::Store if translated => Self::StoreTranslated {
                width,
                rn,
                rt,
                offset,
                offsetting: mode.offsetting,
            },
            LoadStoreKind::Load if !offset.is_register() && rn == REG_PROGRAM_COUNTER => {
                Self::LoadLiteral {
                    width,
                    rt,
                    offset: instruction.get_bits(0..=11),
                    offsetting: mode.offsetting,
                }
            }
            LoadStoreKind::Load => Self::Load {
                width,
                rn,
                rt,
                offset,
                mode,
                wback: has_writeback(instruction),
            },
            LoadStoreKind::Store => Self::Store {
                width,
                rn,
                rt,
                offset,
                mode,
                wback: has_writeback(instruction),
            },
        }
    }
}

/// Decodes one 01x-class instruction and routes it to its executor.
pub(crate) fn emulate(
    vcpu: &mut impl Vcpu,
    instruction: u32,
) -> Result<Option<u32>, EmulateError> {
    use SingleDataTransfer::*;
    match SingleDataTransfer::from(instruction) {
        Load {
            width,
            rn,
            rt,
            offset,
            mode,
            wback,
        } => load(vcpu, instruction, width, rn, rt, offset, mode, wback),
        LoadLiteral {
            width,
            rt,
            offset,
            offsetting,
        } => load_literal(vcpu, instruction, width, rt, offset, offsetting),
        Store {
            width,
            rn,
            rt,
            offset,
            mode,
            wback,
        } => store(vcpu, instruction, width, rn, rt, offset, mode, wback),
        LoadTranslated {
            width,
            rn,
            rt,
            offset,
            offsetting,
        } => load_translated(vcpu, instruction, width, rn, rt, offset, offsetting),
        StoreTranslated {
            width,
            rn,
            rt,
            offset,
            offsetting,
        } => store_translated(vcpu, instruction, width, rn, rt, offset, offsetting),
        Unpredictable { what } => Err(unpredictable(vcpu, instruction, what)),
    }
}

#[allow(clippy::too_many_arguments)]
fn load(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    width: ReadWriteKind,
    rn: u32,
    rt: u32,
    offset: TransferOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if width == ReadWriteKind::Byte && rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "program counter offset"));
    }
    if wback && (rn == rt || (offset.is_register() && rn == REG_PROGRAM_COUNTER)) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps the destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    let data = read_data(vcpu, address, width, false)?;
    vcpu.set_register_at(rt, data);
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    if rt == REG_PROGRAM_COUNTER {
        return Ok(None);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn load_literal(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    width: ReadWriteKind,
    rt: u32,
    offset: u32,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if width == ReadWriteKind::Byte && rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = align(vcpu.program_counter());
    let address = offsetting.apply(base, offset);
    let data = read_data(vcpu, address, width, false)?;
    vcpu.set_register_at(rt, data);
    if rt == REG_PROGRAM_COUNTER {
        return Ok(None);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// Stores read the source register raw; a program counter source stores
/// the trapped instruction's own address.
#[allow(clippy::too_many_arguments)]
fn store(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    width: ReadWriteKind,
    rn: u32,
    rt: u32,
    offset: TransferOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if width == ReadWriteKind::Byte && rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter source"));
    }
    if offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "program counter offset"));
    }
    if wback && (rn == REG_PROGRAM_COUNTER || rn == rt) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps a source"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    let data = vcpu.register_at(rt);
    write_data(vcpu, address, data, width, false)?;
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// The unprivileged loads: post-indexed from the unmodified base, with
/// user-mode permissions and unconditional write-back.
fn load_translated(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    width: ReadWriteKind,
    rn: u32,
    rt: u32,
    offset: TransferOffset,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER
        || rn == REG_PROGRAM_COUNTER
        || rn == rt
        || offset.uses(REG_PROGRAM_COUNTER)
    {
        return Err(unpredictable(vcpu, instruction, "unprivileged load operands"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let offset = offset.value(vcpu);
    let data = read_data(vcpu, base, width, true)?;
    vcpu.set_register_at(rt, data);
    vcpu.set_register_at(rn, offsetting.apply(base, offset));
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn store_translated(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    width: ReadWriteKind,
    rn: u32,
    rt: u32,
    offset: TransferOffset,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if width == ReadWriteKind::Byte && rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter source"));
    }
    if rn == REG_PROGRAM_COUNTER || rn == rt || offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "unprivileged store operands"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let offset = offset.value(vcpu);
    let data = vcpu.register_at(rt);
    write_data(vcpu, base, data, width, true)?;
    vcpu.set_register_at(rn, offsetting.apply(base, offset));
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn read_data(
    vcpu: &mut impl Vcpu,
    address: u32,
    width: ReadWriteKind,
    user_access: bool,
) -> Result<u32, GuestFault> {
    match width {
        ReadWriteKind::Word => vcpu.read_word(address, user_access),
        ReadWriteKind::Byte => Ok(u32::from(vcpu.read_byte(address, user_access)?)),
    }
}

fn write_data(
    vcpu: &mut impl Vcpu,
    address: u32,
    value: u32,
    width: ReadWriteKind,
    user_access: bool,
) -> Result<(), GuestFault> {
    match width {
        ReadWriteKind::Word => vcpu.write_word(address, value, user_access),
        ReadWriteKind::Byte => vcpu.write_byte(address, value as u8, user_access),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::arm::addressing::Indexing;
    use crate::vcpu::testing::MockVcpu;

    #[test]
    fn decode_selects_the_form() {
        // ldr r2, [r3, #8]!
        assert_eq!(
            SingleDataTransfer::from(0xE5B3_2008),
            SingleDataTransfer::Load {
                width: ReadWriteKind::Word,
                rn: 3,
                rt: 2,
                offset: TransferOffset::Immediate { offset: 8 },
                mode: AddressingMode {
                    indexing: Indexing::Pre,
                    offsetting: Offsetting::Up,
                },
                wback: true,
            }
        );
        // ldr r2, [r0, r1, lsl #2]
        assert_eq!(
            SingleDataTransfer::from(0xE790_2101),
            SingleDataTransfer::Load {
                width: ReadWriteKind::Word,
                rn: 0,
                rt: 2,
                offset: TransferOffset::Register {
                    rm: 1,
                    kind: ShiftKind::Lsl,
                    amount: 2,
                },
                mode: AddressingMode {
                    indexing: Indexing::Pre,
                    offsetting: Offsetting::Up,
                },
                wback: false,
            }
        );
        // ldr r1, [pc, #-8]
        assert_eq!(
            SingleDataTransfer::from(0xE51F_1008),
            SingleDataTransfer::LoadLiteral {
                width: ReadWriteKind::Word,
                rt: 1,
                offset: 8,
                offsetting: Offsetting::Down,
            }
        );
        // ldrt r1, [r0], #4
        assert_eq!(
            SingleDataTransfer::from(0xE4B0_1004),
            SingleDataTransfer::LoadTranslated {
                width: ReadWriteKind::Word,
                rn: 0,
                rt: 1,
                offset: TransferOffset::Immediate { offset: 4 },
                offsetting: Offsetting::Up,
            }
        );
        // strb r1, [r0]
        assert_eq!(
            SingleDataTransfer::from(0xE5C0_1000),
            SingleDataTransfer::Store {
                width: ReadWriteKind::Byte,
                rn: 0,
                rt: 1,
                offset: TransferOffset::Immediate { offset: 0 },
                mode: AddressingMode {
                    indexing: Indexing::Pre,
                    offsetting: Offsetting::Up,
                },
                wback: false,
            }
        );
    }

    #[test]
    fn decode_refuses_the_media_space() {
        // register offset with bit 4 set
        assert_eq!(
            SingleDataTransfer::from(0xE790_1011),
            SingleDataTransfer::Unpredictable {
                what: "media instruction"
            }
        );
    }

    #[test]
    fn ldr_pre_indexed_writes_back() {
        // ldr r2, [r3, #8]!
        let mut vcpu = MockVcpu::new();
        vcpu.regs[3] = 0x1000;
        vcpu.store_word(0x1008, 0xCAFE_F00D);
        assert_eq!(emulate(&mut vcpu, 0xE5B3_2008), Ok(Some(4)));
        assert_eq!(vcpu.regs[2], 0xCAFE_F00D);
        assert_eq!(vcpu.regs[3], 0x1008);
    }

    #[test]
    fn ldr_scaled_register_offset() {
        // ldr r2, [r0, r1, lsl #2]
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x100;
        vcpu.regs[1] = 4;
        vcpu.store_word(0x110, 0x5555_AAAA);
        assert_eq!(emulate(&mut vcpu, 0xE790_2101), Ok(Some(4)));
        assert_eq!(vcpu.regs[2], 0x5555_AAAA);
        assert_eq!(vcpu.regs[0], 0x100);
    }

    #[test]
    fn ldr_literal_reads_below_the_pc() {
        // ldr r1, [pc, #-8]
        let mut vcpu = MockVcpu::with_program_counter(0x1000);
        vcpu.store_word(0xFF8, 77);
        assert_eq!(emulate(&mut vcpu, 0xE51F_1008), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 77);
    }

    #[test]
    fn ldr_to_the_pc_reports_no_advance() {
        // ldr pc, [r0]
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[0] = 0x100;
        vcpu.store_word(0x100, 0x4000);
        assert_eq!(emulate(&mut vcpu, 0xE590_F000), Ok(None));
        assert_eq!(vcpu.regs[15], 0x4000);
    }

    #[test]
    fn str_stores_the_word() {
        // str r1, [r0, #4]
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.regs[1] = 0xDEAD_BEEF;
        assert_eq!(emulate(&mut vcpu, 0xE580_1004), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x44), 0xDEAD_BEEF);
        assert_eq!(vcpu.regs[0], 0x40);
    }

    #[test]
    fn str_post_indexed_writes_back() {
        // str r1, [r0], #4
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.regs[1] = 9;
        assert_eq!(emulate(&mut vcpu, 0xE480_1004), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 9);
        assert_eq!(vcpu.regs[0], 0x44);
    }

    #[test]
    fn str_of_the_pc_stores_the_raw_value() {
        // str pc, [r0]
        let mut vcpu = MockVcpu::with_program_counter(0x1000);
        vcpu.regs[0] = 0x40;
        assert_eq!(emulate(&mut vcpu, 0xE580_F000), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 0x1000);
    }

    #[test]
    fn ldrb_zero_extends() {
        // ldrb r1, [r0]
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.regs[1] = 0xFFFF_FFFF;
        vcpu.store_word(0x40, 0x80);
        assert_eq!(emulate(&mut vcpu, 0xE5D0_1000), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 0x80);
    }

    #[test]
    fn strb_stores_only_the_low_byte() {
        // strb r1, [r0]
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.regs[1] = 0x1234_56AB;
        assert_eq!(emulate(&mut vcpu, 0xE5C0_1000), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 0xAB);
    }

    #[test]
    fn ldrb_to_the_pc_is_refused() {
        // ldrb pc, [r0]
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xE5D0_F000),
            Err(EmulateError::Unpredictable {
                instruction: 0xE5D0_F000
            })
        );
        assert!(vcpu.halted);
    }

    #[test]
    fn ldrt_uses_a_user_mode_access() {
        // ldrt r1, [r0], #4
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.store_word(0x40, 0x1234);
        assert_eq!(emulate(&mut vcpu, 0xE4B0_1004), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 0x1234);
        assert_eq!(vcpu.regs[0], 0x44);
        assert!(vcpu.accesses.iter().all(|access| access.user_access));
    }

    #[test]
    fn ldrt_aliasing_the_base_is_refused() {
        // ldrt r0, [r0], #4
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xE4B0_0004),
            Err(EmulateError::Unpredictable {
                instruction: 0xE4B0_0004
            })
        );
    }

    #[test]
    fn strt_of_the_pc_stores_the_raw_value() {
        // strt pc, [r0]
        let mut vcpu = MockVcpu::with_program_counter(0x1000);
        vcpu.regs[0] = 0x40;
        assert_eq!(emulate(&mut vcpu, 0xE4A0_F000), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 0x1000);
        assert!(vcpu.accesses.iter().all(|access| access.user_access));
    }

    #[test]
    fn strbt_of_the_pc_is_refused() {
        // strbt pc, [r0]
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xE4E0_F000),
            Err(EmulateError::Unpredictable {
                instruction: 0xE4E0_F000
            })
        );
    }

    #[test]
    fn ldr_writeback_aliasing_the_destination_is_refused() {
        // ldr r0, [r0, #4]!
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xE5B0_0004),
            Err(EmulateError::Unpredictable {
                instruction: 0xE5B0_0004
            })
        );
    }

    #[test]
    fn media_bit_pattern_is_refused() {
        // register offset with bit 4 set is the media space
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xE790_1011),
            Err(EmulateError::Unpredictable {
                instruction: 0xE790_1011
            })
        );
    }

    #[test]
    fn failed_condition_skips_the_access() {
        // ldreq r1, [r0] with Z clear
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        assert_eq!(emulate(&mut vcpu, 0x0590_1000), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 0);
        assert!(vcpu.accesses.is_empty());
    }

    #[test]
    fn faulting_store_leaves_the_base_alone() {
        // str r1, [r0], #4 with the access faulting
        let mut vcpu = MockVcpu::new();
        vcpu.fault_address = Some(0x40);
        vcpu.regs[0] = 0x40;
        vcpu.regs[1] = 5;
        assert_eq!(
            emulate(&mut vcpu, 0xE480_1004),
            Err(EmulateError::GuestFault(GuestFault { address: 0x40 }))
        );
        assert_eq!(vcpu.regs[0], 0x40);
    }
}
