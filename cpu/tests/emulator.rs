//! End-to-end tests: assemble a source program, boot it through the
//! bootstrap ROM (or a depot ring), run it to completion and check
//! the machine state and tape output.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use assembler::Assembler;
use base::prelude::*;
use cpu::io::wordio::send_as_u32;
use cpu::io::{DEPOT_OP_DRUM, DEPOT_OP_SELECT, DRUM_OP_SELECT};
use cpu::{Emulator, IP_MODE_MASK};

/// Byte sink the test can read back after the emulator is done.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn assemble(emulator: &mut Emulator, source: &str) {
    let mut asm = Assembler::default();
    for (name, value) in emulator.defines() {
        asm.predefine(&name, &value);
    }
    emulator.program = asm.parse(source).expect("program should assemble");
}

fn wire_tape(emulator: &mut Emulator, input: &[u8]) -> SharedBuf {
    let sink = SharedBuf::default();
    let tape = emulator.tape_mut().expect("tape channel is bound");
    tape.set_input(Box::new(Cursor::new(input.to_vec())));
    tape.set_output(Box::new(sink.clone()));
    sink
}

/// Run a straight-line program one record at a time, checking the
/// line-number and address attribution as it goes.
fn run_single(emulator: &mut Emulator, source: &str, input: &[u8]) -> Vec<u8> {
    assemble(emulator, source);
    emulator.reset(ChannelId::MONITOR).expect("reset should succeed");
    let sink = wire_tape(emulator, input);

    let records = emulator.program.opcodes.clone();
    for op in &records {
        assert_eq!(emulator.line_no(), op.line_no);
        for c in 0..op.codes.len() {
            assert_eq!(emulator.cpu.ip, (op.ip + c) as u32, "line {}", op.line_no);
            let done = emulator.tick().unwrap_or_else(|fault| {
                panic!("line {}: {}\n{}", op.line_no, fault, emulator.cpu)
            });
            assert!(!done, "line {}", op.line_no);
        }
    }
    assert_eq!(emulator.tick(), Ok(true));

    let bytes = sink.0.lock().unwrap().clone();
    bytes
}

/// Run a branching program to completion.
fn run_branch(emulator: &mut Emulator, source: &str, input: &[u8]) -> Vec<u8> {
    assemble(emulator, source);
    emulator.reset(ChannelId::MONITOR).expect("reset should succeed");
    let sink = wire_tape(emulator, input);

    loop {
        match emulator.tick() {
            Ok(true) => break,
            Ok(false) => {}
            Err(fault) => panic!("{fault}\n{}", emulator.cpu),
        }
    }

    let bytes = sink.0.lock().unwrap().clone();
    bytes
}

#[test]
fn test_tape_echo_through_capp() {
    let mut emulator = Emulator::new();
    let program = "list of ARENA_FREE ARENA_MASK\n\
                   list all\n\
                   fetch tape 0xffff\n\
                   list not\n\
                   write list ARENA_IO 0xffff0000\n\
                   list of $(ARENA_IO | 0x123) $(ARENA_MASK | 0x7ff)\n\
                   write r0 0x10\n\
                   write r1 0x20\n\
                   write r2 0x30\n\
                   write r3 0x40\n\
                   list all\n\
                   store tape 0xffff\n\
                   list not\n";
    let input = [0x23u8, 0x00, 0x23, 0x01, 0x23, 0x09];

    let output = run_single(&mut emulator, program, &input);

    assert_eq!(emulator.cpu.match_reg, ARENA_IO | 0x123);
    assert_eq!(emulator.cpu.mask_reg, ARENA_MASK | 0x7ff);
    assert_eq!(emulator.cpu.capp.first(), ARENA_IO | 0x123);
    assert_eq!(emulator.cpu.capp.count(), 2);
    assert_eq!(emulator.cpu.register[..4], [0x10, 0x20, 0x30, 0x40]);
    // The first select/fetch pair consumed the header cell; the final
    // four bytes echo the input.
    assert_eq!(output, vec![0x23, 0x01, 0x23, 0x09]);
}

#[test]
fn test_alu_program() {
    let mut emulator = Emulator::new();
    let program = "write r1 0x10\n\
                   alu add r1 1\n\
                   alu xor r0 r0\n\
                   alu sub r0 r1\n\
                   write r1 0x200\n\
                   alu xor r1 r0\n\
                   alu and r1 0xf\n\
                   alu shl r1 2\n\
                   alu and r1 ~0x3\n\
                   alu and r1 0x20\n\
                   write r2 0x100\n\
                   alu or r2 0x200\n\
                   alu shr r2 4\n\
                   alu and r2 ~0xf000_0000\n\
                   write r3 0x40\n";

    run_single(&mut emulator, program, &[]);

    assert_eq!(emulator.cpu.register[0], (-0x11i32) as u32);
    assert_eq!(emulator.cpu.register[1], 0x20);
    assert_eq!(emulator.cpu.register[2], 0x30);
    assert_eq!(emulator.cpu.register[3], 0x40);
}

#[test]
fn test_equates_and_expressions() {
    let mut emulator = Emulator::new();
    let program = ".equ CONST_10 0x10\n\
                   write r0 CONST_10\n\
                   write r1 $(CONST_10 + CONST_10)\n\
                   .equ CONST_30 $(2 * CONST_10 + CONST_10)\n\
                   write r2 CONST_30\n\
                   write r3 $(LINENO * 8 + 0x10)\n";

    run_single(&mut emulator, program, &[]);

    assert_eq!(emulator.cpu.register[..4], [0x10, 0x20, 0x30, 0x40]);
}

#[test]
fn test_macro_program() {
    let mut emulator = Emulator::new();
    let program = ".macro SETADD rn a b\n\
                   write rn a\n\
                   alu add rn b\n\
                   .endm\n\
                   SETADD r0 8 8\n\
                   .equ CONST_10 0x10\n\
                   SETADD r1 CONST_10 CONST_10\n\
                   SETADD r2 $(CONST_10 + CONST_10) r0\n\
                   SETADD r3 r2 r0\n";

    run_single(&mut emulator, program, &[]);

    assert_eq!(emulator.cpu.register[..4], [0x10, 0x20, 0x30, 0x40]);
}

#[test]
fn test_labels_calls_and_returns() {
    let mut emulator = Emulator::new();
    let program = "jump R0\n\
                   AddOneToR0:\n\
                   alu add r0 1\n\
                   return\n\
                   R1: write r1 0x20\n\
                   jump R2\n\
                   R0: AND_ALSO:\n\
                   write r0 0x10\n\
                   jump R1\n\
                   R2:\n\
                   call AddOneToR0\n\
                   call AddOneToR0\n\
                   \n\
                   write r2 0x30\n\
                   write r3 0x40\n";

    run_branch(&mut emulator, program, &[]);

    assert_eq!(emulator.cpu.register[0], 0x12);
    assert_eq!(emulator.cpu.register[1], 0x20);
    assert_eq!(emulator.cpu.register[2], 0x30);
    assert_eq!(emulator.cpu.register[3], 0x40);
}

#[test]
fn test_temp_round_trip() {
    let mut emulator = Emulator::new();
    let program = "list of ARENA_FREE ARENA_MASK\n\
                   list all\n\
                   fetch tape 0xffff\n\
                   list not\n\
                   write list ARENA_IO 0xffff0000\n\
                   list of ARENA_IO ARENA_MASK\n\
                   store temp 0xffff\n\
                   list not\n\
                   write list ARENA_FREE ARENA_MASK\n\
                   fetch temp 0xffff\n\
                   list not\n\
                   write list 0x9000 0xf000\n\
                   store tape 0xffff\n\
                   list not\n";
    let input = [0x34u8, 0x12, 0x78, 0x56, 0xcd, 0xab];

    let output = run_single(&mut emulator, program, &input);

    assert_eq!(output, vec![0x34, 0x92, 0x78, 0x96, 0xcd, 0x9b]);
}

#[test]
fn test_await_cooperative_retry() {
    let mut emulator = Emulator::new();
    assemble(&mut emulator, "await temp r0\nexit\n");
    emulator.reset(ChannelId::MONITOR).unwrap();

    // Nothing queued: the AWAIT holds the instruction pointer but the
    // clock still advances.
    let ticks = emulator.cpu.ticks;
    assert_eq!(emulator.tick(), Ok(false));
    assert_eq!(emulator.cpu.ip & !IP_MODE_MASK, 0);
    assert_eq!(emulator.cpu.ticks, ticks + 1);
    assert_eq!(emulator.tick(), Ok(false));
    assert_eq!(emulator.cpu.ip & !IP_MODE_MASK, 0);

    // A response arrives: the next tick delivers it and moves on.
    emulator.cpu.post_response(ChannelId::TEMP, 0x77);
    assert_eq!(emulator.tick(), Ok(false));
    assert_eq!(emulator.cpu.register[0], 0x77);

    // The exit instruction halts; the tick after reports done.
    assert_eq!(emulator.tick(), Ok(false));
    assert_eq!(emulator.cpu.ip, 0xffff_ffff);
    assert_eq!(emulator.tick(), Ok(true));
}

#[test]
fn test_trap_interrupts_program() {
    let mut emulator = Emulator::new();
    assemble(
        &mut emulator,
        "write r0 1\n\
         write r1 2\n\
         exit\n",
    );
    emulator.reset(ChannelId::MONITOR).unwrap();

    emulator.trap();
    let fault = emulator.tick().unwrap_err();
    assert_eq!(fault.fault, cpu::Fault::IpTrap);
    assert_eq!(fault.line_no, 1);

    // The trap is consumed; the program runs out normally.
    loop {
        match emulator.tick() {
            Ok(true) => break,
            Ok(false) => {}
            Err(fault) => panic!("{fault}"),
        }
    }
    assert_eq!(emulator.cpu.register[1], 2);
}

#[test]
fn test_boot_from_depot_ring() {
    let mut emulator = Emulator::new();
    assemble(&mut emulator, "write r0 0x55\nexit\n");
    let image = emulator.program.binary();

    // Create drum 0, select it and its ring 0, and stream the
    // compiled image in, the way the host saves a program.
    emulator.depot_mut().unwrap().drum_mut(0);
    let slot = emulator.cpu.channel_mut(ChannelId::DEPOT).unwrap();
    let (channel, response) = (&mut slot.channel, &mut slot.response);
    channel.alert(DEPOT_OP_SELECT, response);
    assert_eq!(response.take(), Some(0));
    channel.alert(DEPOT_OP_DRUM | DRUM_OP_SELECT, response);
    assert_eq!(response.take(), Some(0));
    for word in &image {
        send_as_u32(channel, *word).unwrap();
    }

    // Booting from the depot streams the ring instead of the ROM.
    emulator.program = base::program::Program::default();
    emulator.reset(ChannelId::DEPOT).unwrap();
    loop {
        match emulator.tick() {
            Ok(true) => break,
            Ok(false) => {}
            Err(fault) => panic!("{fault}"),
        }
    }
    assert_eq!(emulator.cpu.register[0], 0x55);
}
