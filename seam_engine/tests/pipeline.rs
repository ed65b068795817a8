//! End-to-end pipeline scenarios: register, sort, synthesize, install,
//! call, and the failure surfaces in between.

use seam_bytecode::{BodyBuilder, Instruction, InstructionStream, MethodBody, Opcode, Register};
use seam_core::{PatchError, Value};
use seam_engine::{
    EngineOptions, Patch, PatchEngine, PatchLedger, PatchOwner, StandinDescriptor,
};

fn add_body() -> MethodBody {
    let mut b = BodyBuilder::new("add", 2);
    let x = b.alloc_register();
    let y = b.alloc_register();
    let r = b.alloc_register();
    b.emit_load_local(x, 0);
    b.emit_load_local(y, 1);
    b.emit_add(r, x, y);
    b.emit_return(r);
    b.finish()
}

/// Rewrite every `Return src` into `Return (src * 2)`.
fn doubling(mut stream: InstructionStream) -> InstructionStream {
    for pos in stream.positions_of(Opcode::Return).into_iter().rev() {
        let src = stream.get(pos).unwrap().inst.dst();
        let two = stream.add_const(Value::Int(2));
        let scratch = Register(stream.alloc_register());
        stream.insert(pos, Instruction::op_di(Opcode::LoadConst, scratch, two));
        stream.insert(pos + 1, Instruction::op_dss(Opcode::Mul, src, src, scratch));
    }
    stream
}

/// Rewrite every `Return src` into `Return (src + 1)`.
fn plus_one(mut stream: InstructionStream) -> InstructionStream {
    for pos in stream.positions_of(Opcode::Return).into_iter().rev() {
        let src = stream.get(pos).unwrap().inst.dst();
        let one = stream.add_const(Value::Int(1));
        let scratch = Register(stream.alloc_register());
        stream.insert(pos, Instruction::op_di(Opcode::LoadConst, scratch, one));
        stream.insert(pos + 1, Instruction::op_dss(Opcode::Add, src, src, scratch));
    }
    stream
}

#[test]
fn add_without_patches_behaves_like_the_original() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    engine.apply(add).unwrap();
    assert_eq!(
        engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(5)
    );
}

#[test]
fn doubling_transpiler_doubles_the_result() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    engine.register_patch(add, Patch::transpiler(PatchOwner::new("double"), doubling));
    engine.apply(add).unwrap();
    assert_eq!(
        engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(10)
    );
}

#[test]
fn after_constraint_orders_transpilers_regardless_of_registration() {
    // double declares it must run after plus_one, so the result is
    // 2 * (a + b + 1) whichever way the two are registered.
    for flip in [false, true] {
        let engine = PatchEngine::new();
        let add = engine.register_method(add_body());
        let first = Patch::transpiler(PatchOwner::new("plus_one"), plus_one);
        let second = Patch::transpiler(PatchOwner::new("double"), doubling)
            .with_after(PatchOwner::new("plus_one"));
        if flip {
            engine.register_patch(add, second);
            engine.register_patch(add, first);
        } else {
            engine.register_patch(add, first);
            engine.register_patch(add, second);
        }
        engine.apply(add).unwrap();
        assert_eq!(
            engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(12),
            "flip = {}",
            flip
        );
    }
}

#[test]
fn repeated_apply_is_idempotent() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    engine.register_patch(add, Patch::transpiler(PatchOwner::new("double"), doubling));
    for _ in 0..4 {
        engine.apply(add).unwrap();
        assert_eq!(
            engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(10)
        );
    }
}

#[test]
fn prefix_and_postfix_weave_around_the_original() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());

    // Prefix that never vetoes.
    let mut b = BodyBuilder::new("observe", 2);
    let r = b.alloc_register();
    b.emit_load_const(r, Value::None);
    b.emit_return(r);
    let observe = engine.register_method(b.finish());

    // Postfix that adds 100 to the result.
    let mut b = BodyBuilder::new("boost", 3);
    let res = b.alloc_register();
    let hundred = b.alloc_register();
    let out = b.alloc_register();
    b.emit_load_local(res, 0);
    b.emit_load_const(hundred, Value::Int(100));
    b.emit_add(out, res, hundred);
    b.emit_return(out);
    let boost = engine.register_method(b.finish());

    engine.register_patch(add, Patch::prefix(PatchOwner::new("observe"), observe));
    engine.register_patch(add, Patch::postfix(PatchOwner::new("boost"), boost));
    engine.apply(add).unwrap();

    assert_eq!(
        engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(105)
    );
}

#[test]
fn reverse_assembly_leaves_the_original_untouched() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    let standin = engine.register_method({
        let mut b = BodyBuilder::new("stand", 2);
        let x = b.alloc_register();
        let y = b.alloc_register();
        let r = b.alloc_register();
        b.emit_load_local(x, 0);
        b.emit_load_local(y, 1);
        b.emit_sub(r, x, y);
        b.emit_return(r);
        b.finish()
    });
    engine.register_patch(add, Patch::transpiler(PatchOwner::new("double"), doubling));

    let replacement = engine
        .reverse(&StandinDescriptor::snapshot(standin), add, None)
        .unwrap();

    // Standin computes 2 * (a - b); the original still computes a + b.
    assert_eq!(
        engine.call(standin, &[Value::Int(5), Value::Int(2)]).unwrap(),
        Value::Int(6)
    );
    assert_eq!(
        engine.call(add, &[Value::Int(5), Value::Int(2)]).unwrap(),
        Value::Int(7)
    );
    assert_eq!(engine.table().lookup(add).unwrap().install_count(), 0);
    assert_eq!(engine.ledger().replacement_of(add), Some(replacement));
}

#[test]
fn missing_standin_callable_fails_before_decoding() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    let fault = engine
        .reverse(&StandinDescriptor::default(), add, None)
        .unwrap_err();
    assert!(matches!(fault.cause, PatchError::MalformedDescriptor { .. }));
    assert!(fault.instructions.is_empty());
}

#[test]
fn generation_failure_reports_a_populated_instruction_map() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    engine.register_patch(
        add,
        Patch::transpiler(PatchOwner::new("truncate"), |mut s| {
            let last = s.len() - 1;
            s.remove(last);
            s
        }),
    );
    let fault = engine.apply(add).unwrap_err();
    assert!(matches!(fault.cause, PatchError::InvalidBody { .. }));
    assert!(!fault.instructions.is_empty());
    assert!(fault.report().contains("Add"));
}

#[test]
fn decode_failure_reports_an_empty_instruction_map() {
    let engine = PatchEngine::new();
    let stub = engine.register_stub("intrinsic", 2);
    let fault = engine.apply(stub).unwrap_err();
    assert!(matches!(fault.cause, PatchError::UnsupportedMethod { .. }));
    assert!(fault.instructions.is_empty());
}

#[test]
fn undecodable_body_reports_an_empty_instruction_map() {
    let engine = PatchEngine::new();
    // A branch past the end of the body is rejected at decode time, before
    // any instruction is mapped.
    let corrupt = engine.register_method(MethodBody {
        name: "corrupt".into(),
        arg_count: 0,
        local_count: 0,
        register_count: 1,
        consts: Vec::new(),
        callees: Vec::new(),
        code: vec![
            Instruction::op_i(Opcode::Jump, 100),
            Instruction::op_d(Opcode::Return, Register(0)),
        ],
        try_regions: Vec::new(),
    });
    let fault = engine.apply(corrupt).unwrap_err();
    assert!(matches!(fault.cause, PatchError::InvalidBody { .. }));
    assert!(fault.instructions.is_empty());
}

#[test]
fn pinned_method_refuses_the_detour_with_a_reason() {
    let engine = PatchEngine::new();
    let add = engine.register_method(add_body());
    engine.pin(add);
    let fault = engine.apply(add).unwrap_err();
    match &fault.cause {
        PatchError::DetourRefused { reason, .. } => assert!(reason.contains("pinned")),
        other => panic!("unexpected fault: {}", other),
    }
    // Refusal left the entry slot alone.
    assert_eq!(
        engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(5)
    );
}

#[test]
fn debug_options_do_not_change_behavior() {
    let engine = PatchEngine::with_options(EngineOptions {
        debug: true,
        ..EngineOptions::default()
    });
    let add = engine.register_method(add_body());
    engine.register_patch(
        add,
        Patch::transpiler(PatchOwner::new("double"), doubling).with_debug(true),
    );
    engine.apply(add).unwrap();
    assert_eq!(
        engine.call(add, &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(10)
    );
}
