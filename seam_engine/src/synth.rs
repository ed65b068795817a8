//! Replacement synthesis.
//!
//! The synthesizer turns an original method plus its registered patches
//! into one independently callable replacement body. Transpilers run over
//! the original's decoded instruction stream; prefixes, postfixes, and
//! finalizers are woven around the transpiled original as a wrapper that
//! calls it. Nothing here mutates live dispatch state; installation is the
//! detour installer's job.
//!
//! Every failure past decode is wrapped into an [`EngineFault`] carrying
//! the indexed instruction map that was current when the failure occurred.

use crate::detour;
use crate::fault::EngineFault;
use crate::ledger::PatchLedger;
use crate::method_table::MethodTable;
use crate::patch::{Patch, PatchCallable, PatchInfo, TranspilerFn};
use crate::sorter::{self, SortDirection};
use seam_bytecode::{BodyBuilder, InstructionMap, InstructionStream, MethodBody, Register};
use seam_core::{MethodId, PatchError, PatchResult, Value};
use std::sync::Arc;
use tracing::debug;

/// Knobs for one synthesis pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthOptions {
    /// Emit extra diagnostics while sorting and generating. Never changes
    /// the produced body.
    pub debug: bool,
}

/// A freshly generated replacement body plus its diagnostic map.
#[derive(Debug, Clone)]
pub struct Synthesized {
    /// The loadable replacement body.
    pub body: MethodBody,
    /// Indexed instructions of the transpiled base, for failure
    /// correlation.
    pub map: InstructionMap,
}

/// Run ordered transpilers over a base body and generate a fresh one.
///
/// `base == None` is the degraded mode used by standin flows: synthesis
/// proceeds from an empty body with only a signature. Decode failure
/// produces a fault with an empty map; generation failure produces a fault
/// carrying the post-transform map.
pub fn synthesize(
    base: Option<&MethodBody>,
    name: &str,
    arg_count: u16,
    transpilers: &[TranspilerFn],
    debug_enabled: bool,
) -> Result<Synthesized, EngineFault> {
    let mut stream = match base {
        Some(body) => InstructionStream::decode(body).map_err(EngineFault::from)?,
        None => InstructionStream::empty(name, arg_count),
    };

    for transform in transpilers {
        stream = transform(stream);
    }

    let map = stream.indexed();
    let body = match stream.emit() {
        Ok(body) => body,
        Err(err) => return Err(EngineFault::new(err, map)),
    };

    if debug_enabled {
        debug!(
            method = name,
            transpilers = transpilers.len(),
            instructions = body.code.len(),
            "base body synthesized"
        );
    }
    Ok(Synthesized { body, map })
}

/// Build the combined replacement for `original` from a patch aggregate.
///
/// Transpilers are sorted and replayed over the original's body. When any
/// prefix, postfix, or finalizer is registered, the transpiled original is
/// registered as a hidden inner method and a wrapper weaving the patch
/// calls around it becomes the replacement. The original's entry slot is
/// not touched.
pub fn build_replacement(
    table: &MethodTable,
    original: MethodId,
    info: &PatchInfo,
    opts: SynthOptions,
) -> Result<Synthesized, EngineFault> {
    let entry = table
        .lookup(original)
        .ok_or_else(|| PatchError::missing_method(PatchError::method_name(original)))?;
    let base = entry
        .body()
        .ok_or_else(|| PatchError::unsupported(entry.name().clone()))?;

    let transpilers = transform_fns(&sorter::sort(
        info.transpilers(),
        SortDirection::HigherFirst,
        opts.debug,
    ))?;

    let mut synth = synthesize(
        Some(&base),
        entry.name(),
        entry.arg_count(),
        &transpilers,
        opts.debug,
    )?;

    let needs_weave =
        !info.prefixes().is_empty() || !info.postfixes().is_empty() || !info.finalizers().is_empty();
    if !needs_weave {
        return Ok(synth);
    }

    let arg_count = entry.arg_count();
    // Patch methods are validated up front so a bad descriptor cannot leak
    // a half-registered inner method into the table.
    let prefixes = patch_methods(
        table,
        &sorter::sort(info.prefixes(), SortDirection::HigherFirst, opts.debug),
        arg_count,
        "prefix",
    )?;
    let postfixes = patch_methods(
        table,
        &sorter::sort(info.postfixes(), SortDirection::LowerFirst, opts.debug),
        arg_count + 1,
        "postfix",
    )?;
    let finalizers = patch_methods(
        table,
        &sorter::sort(info.finalizers(), SortDirection::HigherFirst, opts.debug),
        1,
        "finalizer",
    )?;

    synth.body.name = format!("{}#inner", entry.name()).into();
    let inner = table.register(synth.body);
    let wrapper = weave(entry.name(), arg_count, inner, &prefixes, &postfixes, &finalizers)
        .map_err(|err| EngineFault::new(err, synth.map.clone()))?;

    if opts.debug {
        debug!(
            method = %entry.name(),
            prefixes = prefixes.len(),
            postfixes = postfixes.len(),
            finalizers = finalizers.len(),
            "wrapper woven around transpiled body"
        );
    }
    Ok(Synthesized {
        body: wrapper,
        map: synth.map,
    })
}

/// Synthesize, register, and install the current replacement for
/// `original`. Returns the replacement's id.
///
/// Re-invocation is the caller's recovery path: every pass starts from the
/// pristine base body and re-targets the entry slot, so repeated calls with
/// the same patch aggregate install identical behavior.
pub fn update_wrapper(
    table: &MethodTable,
    ledger: &dyn PatchLedger,
    original: MethodId,
    opts: SynthOptions,
) -> Result<MethodId, EngineFault> {
    let info = ledger
        .patch_info(original)
        .unwrap_or_else(|| Arc::new(PatchInfo::new()));
    let synth = build_replacement(table, original, &info, opts)?;
    let map = synth.map.clone();
    let replacement = table.register(synth.body);
    detour::install(table, original, replacement).map_err(|err| EngineFault::new(err, map))?;
    Ok(replacement)
}

/// Extract the transform behind each sorted transpiler patch.
pub(crate) fn transform_fns(sorted: &[Patch]) -> PatchResult<Vec<TranspilerFn>> {
    sorted
        .iter()
        .map(|p| match &p.callable {
            PatchCallable::Transform(f) => Ok(f.clone()),
            PatchCallable::Method(_) => Err(PatchError::malformed(format!(
                "transpiler {} must carry an instruction-stream transform",
                p.owner
            ))),
        })
        .collect()
}

/// Resolve sorted method-backed patches, checking registration and arity.
fn patch_methods(
    table: &MethodTable,
    sorted: &[Patch],
    want_args: u16,
    role: &str,
) -> PatchResult<Vec<MethodId>> {
    sorted
        .iter()
        .map(|p| {
            let id = match &p.callable {
                PatchCallable::Method(id) => *id,
                PatchCallable::Transform(_) => {
                    return Err(PatchError::malformed(format!(
                        "{} {} must be backed by a registered method",
                        role, p.owner
                    )))
                }
            };
            let entry = table.lookup(id).ok_or_else(|| {
                PatchError::malformed(format!(
                    "{} {} refers to unregistered method {}",
                    role, p.owner, id
                ))
            })?;
            if entry.is_stub() {
                return Err(PatchError::malformed(format!(
                    "{} {} has no executable body",
                    role, p.owner
                )));
            }
            if entry.arg_count() != want_args {
                return Err(PatchError::malformed(format!(
                    "{} {} takes {} arguments, expected {}",
                    role,
                    p.owner,
                    entry.arg_count(),
                    want_args
                )));
            }
            Ok(id)
        })
        .collect()
}

/// Weave prefixes, the inner call, postfixes, and finalizers into one
/// wrapper body.
///
/// Wrapper layout:
///   - the result slot starts as the absent value;
///   - each prefix runs with the original arguments and skips the inner
///     call (only the inner call) by returning `Bool(false)`;
///   - the inner call is guarded when finalizers exist, and a raised value
///     reaches them before being re-raised;
///   - each postfix runs with (current result, original arguments) and
///     replaces the result by returning anything but the absent value;
///   - finalizers run on the normal path with the absent value.
fn weave(
    name: &Arc<str>,
    arg_count: u16,
    inner: MethodId,
    prefixes: &[MethodId],
    postfixes: &[MethodId],
    finalizers: &[MethodId],
) -> PatchResult<MethodBody> {
    let n = arg_count as usize;
    // n+1 contiguous argument registers plus four scratch registers.
    if n + 5 > u8::MAX as usize {
        return Err(PatchError::invalid_body(format!(
            "{} takes too many parameters to weave a wrapper",
            name
        )));
    }

    let mut b = BodyBuilder::new(name.clone(), arg_count);
    let res_slot = b.alloc_local();
    let exc_slot = b.alloc_local();

    // The argument run must start at register 0: a raised value is
    // delivered there, so the handler can persist it before finalizers run.
    let call_regs: Vec<Register> = (0..n + 1).map(|_| b.alloc_register()).collect();
    let rres = b.alloc_register();
    let rtmp = b.alloc_register();
    let rflag = b.alloc_register();
    let rconst = b.alloc_register();

    let skip = b.create_label();
    let post = b.create_label();
    let (guard_start, guard_end, handler) = (b.create_label(), b.create_label(), b.create_label());

    let load_args = |b: &mut BodyBuilder, base: usize| {
        for i in 0..n {
            b.emit_load_local(call_regs[base + i], i as u16);
        }
    };

    b.emit_load_const(rconst, Value::None);
    b.emit_store_local(rconst, res_slot);

    for &prefix in prefixes {
        load_args(&mut b, 0);
        b.emit_call(rtmp, prefix, call_regs[0]);
        b.emit_load_const(rconst, Value::Bool(false));
        b.emit_cmp_eq(rflag, rtmp, rconst);
        b.emit_jump_if_true(rflag, skip);
    }

    b.bind_label(guard_start);
    load_args(&mut b, 0);
    b.emit_call(rres, inner, call_regs[0]);
    b.emit_store_local(rres, res_slot);
    b.bind_label(guard_end);
    b.bind_label(skip);
    b.emit_jump(post);

    if !finalizers.is_empty() {
        b.bind_label(handler);
        b.emit_store_local(call_regs[0], exc_slot);
        for &finalizer in finalizers {
            b.emit_load_local(call_regs[0], exc_slot);
            b.emit_call(rtmp, finalizer, call_regs[0]);
        }
        b.emit_load_local(rtmp, exc_slot);
        b.emit_raise(rtmp);
        b.guard(guard_start, guard_end, handler);
    }

    b.bind_label(post);
    for &postfix in postfixes {
        b.emit_load_local(call_regs[0], res_slot);
        load_args(&mut b, 1);
        b.emit_call(rtmp, postfix, call_regs[0]);
        // A postfix keeps the current result by returning the absent value.
        let keep = b.create_label();
        b.emit_load_const(rconst, Value::None);
        b.emit_cmp_eq(rflag, rtmp, rconst);
        b.emit_jump_if_true(rflag, keep);
        b.emit_store_local(rtmp, res_slot);
        b.bind_label(keep);
    }
    for &finalizer in finalizers {
        b.emit_load_const(call_regs[0], Value::None);
        b.emit_call(rtmp, finalizer, call_regs[0]);
    }

    b.emit_load_local(rres, res_slot);
    b.emit_return(rres);
    Ok(b.finish())
}
