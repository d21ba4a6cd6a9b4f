//! Front-end intake: compile a list of units into the single module an
//! image is built from.
//!
//! Units are compiled for two worlds, the type-inference world first and
//! then the requested one. Each compiled unit arrives as its own module
//! fragment; fragments are linked into the base module and their entry
//! points are recorded in the function export table. Globals the front end
//! reports as targets become the global export table.
//!
//! Under [`CompilationPolicy::Default`] every definition is internalized and
//! given an assembler-safe name afterwards; the export tables are the only
//! way the loader reaches them.

use ori_lir::{link_in, GlobalId, LinkError, LinkMap, Linkage, Module, ScalarType};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::exports::{emit_markers, ExportTable};
use crate::names::make_safe_name;

/// Generic entry point taking boxed arguments.
pub const FPTR_ARGS: &str = "ori_fptr_args";
/// Generic entry point taking boxed arguments and static parameters.
pub const FPTR_SPARAM: &str = "ori_fptr_sparam";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompilationPolicy {
    /// Build a self-contained image: internalize everything.
    #[default]
    Default,
    /// Produce a module for an external consumer. The inference world is
    /// skipped and linkage is left alone.
    Extern,
}

/// Where compiled code is looked up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheLookup {
    /// The front end's own cache; misses run inference on demand.
    #[default]
    Default,
    /// A caller-supplied cache; misses are errors.
    Custom,
}

/// A method instance to compile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodUnit {
    pub id: u64,
    pub name: String,
    /// First world the method is visible in.
    pub primary_world: u64,
    /// Last world the method is visible in.
    pub deleted_world: u64,
}

impl MethodUnit {
    pub fn visible_in(&self, world: u64) -> bool {
        self.primary_world <= world && world <= self.deleted_world
    }
}

/// A C-callable entry point to create for a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CCallable {
    pub name: String,
    pub ret: ScalarType,
    pub params: Vec<ScalarType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompilationUnit {
    Method(MethodUnit),
    CCallable(CCallable),
}

/// Inferred code ready for emission. `id` identifies it across worlds so
/// that it is emitted once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeInstance {
    pub id: u64,
    pub unit: u64,
}

/// One emitted fragment and the names of its entry points inside it.
#[derive(Clone, Debug)]
pub struct EmittedCode {
    pub module: Module,
    /// Generic entry point: a function in `module`, or [`FPTR_ARGS`] /
    /// [`FPTR_SPARAM`].
    pub function_object: String,
    /// Specialized-signature entry point, if there is one.
    pub spec_function_object: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    #[error("Refusing to automatically run type inference with custom cache lookup (unit `{unit}`)")]
    InferenceRefused { unit: String },

    #[error("front end failed: {message}")]
    Frontend { message: String },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("entry point `{name}` is not a function of its fragment")]
    MissingFunction { name: String },

    #[error("global target `{name}` is not an initialized data object")]
    InvalidGlobal { name: String },

    #[error("global target `{name}` is listed twice")]
    DuplicateGlobal { name: String },
}

/// The code generator behind [`create_native`].
pub trait CodegenFrontend {
    /// World type inference itself runs in; 0 if none.
    fn typeinf_world(&self) -> u64;

    /// Cached code for `unit` in `world`.
    fn lookup(&mut self, unit: &MethodUnit, world: u64) -> Option<CodeInstance>;

    /// Run inference for `unit` in `world`. `None` if it cannot be inferred.
    fn infer(&mut self, unit: &MethodUnit, world: u64) -> Option<CodeInstance>;

    /// Emit `code` as a module fragment.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Frontend`] on code generation failure.
    fn emit(&mut self, code: &CodeInstance, world: u64) -> Result<EmittedCode, NativeError>;

    /// Add a C-callable entry point to the shared module.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Frontend`] on code generation failure.
    fn emit_ccallable(&mut self, unit: &CCallable, module: &mut Module) -> Result<(), NativeError>;

    /// Compile everything the emitted code referenced but nobody compiled
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Frontend`] on code generation failure.
    fn drain_workqueue(
        &mut self,
        policy: CompilationPolicy,
    ) -> Result<Vec<(CodeInstance, EmittedCode)>, NativeError>;

    /// Names of the data objects the loader initializes, in export order.
    fn global_targets(&self) -> Vec<String>;
}

/// The linked module plus its export tables.
#[derive(Clone, Debug)]
pub struct NativeCode {
    pub module: Module,
    pub fvars: Vec<GlobalId>,
    pub gvars: Vec<GlobalId>,
    /// `(code id, function id, spec function id)` per compiled code.
    /// Function ids are 1-based positions in `fvars`; `-1` and `-2` mark
    /// the generic entry points, 0 marks no specialized entry.
    pub unit_map: Vec<(u64, i32, i32)>,
}

impl NativeCode {
    /// The `(function id, spec function id)` pair recorded for `code`.
    pub fn ids_for(&self, code: u64) -> Option<(i32, i32)> {
        self.unit_map
            .iter()
            .find(|(id, _, _)| *id == code)
            .map(|&(_, func, spec)| (func, spec))
    }

    /// The function with 1-based export id `id`.
    pub fn function(&self, id: i32) -> Option<GlobalId> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.fvars.get(idx).copied()
    }

    pub fn export_table(&self) -> ExportTable {
        ExportTable::new(self.fvars.clone(), self.gvars.clone())
    }
}

fn lookup_or_infer(
    frontend: &mut dyn CodegenFrontend,
    lookup: CacheLookup,
    unit: &MethodUnit,
    world: u64,
) -> Result<Option<CodeInstance>, NativeError> {
    if let Some(code) = frontend.lookup(unit, world) {
        return Ok(Some(code));
    }
    match lookup {
        CacheLookup::Custom => Err(NativeError::InferenceRefused {
            unit: unit.name.clone(),
        }),
        CacheLookup::Default => Ok(frontend.infer(unit, world)),
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    reason = "export ids are i32 by format"
)]
fn push_fvar(fvars: &mut Vec<GlobalId>, id: GlobalId) -> i32 {
    fvars.push(id);
    fvars.len() as i32
}

fn fragment_function(fragment: &Module, name: &str) -> Option<GlobalId> {
    fragment.lookup(name).filter(|&id| fragment[id].is_function())
}

/// Where linking put the fragment function `src` named `name`.
fn linked(map: &LinkMap, name: &str, src: Option<GlobalId>) -> Result<GlobalId, NativeError> {
    src.and_then(|id| map.get(id))
        .ok_or_else(|| NativeError::MissingFunction {
            name: name.to_owned(),
        })
}

/// Compile `units` and link them into `base`.
///
/// # Errors
///
/// Returns [`NativeError::InferenceRefused`] for a cache miss under
/// [`CacheLookup::Custom`], front-end and link failures, and
/// [`NativeError::MissingFunction`] / [`NativeError::InvalidGlobal`] when
/// the front end names entry points or globals that do not exist.
pub fn create_native(
    units: &[CompilationUnit],
    world: u64,
    lookup: CacheLookup,
    policy: CompilationPolicy,
    frontend: &mut dyn CodegenFrontend,
    base: Module,
) -> Result<NativeCode, NativeError> {
    let mut module = base;
    let mut seen = FxHashSet::default();
    let mut compiled: Vec<(CodeInstance, EmittedCode)> = Vec::new();

    let worlds = [frontend.typeinf_world(), world];
    for (pass, &w) in worlds.iter().enumerate() {
        if w == 0 {
            continue;
        }
        if policy != CompilationPolicy::Default && w == worlds[0] {
            continue;
        }
        for unit in units {
            let method = match unit {
                CompilationUnit::CCallable(ccallable) => {
                    if pass == 1 {
                        frontend.emit_ccallable(ccallable, &mut module)?;
                    }
                    continue;
                }
                CompilationUnit::Method(method) => method,
            };
            if !method.visible_in(w) {
                continue;
            }
            let Some(code) = lookup_or_infer(frontend, lookup, method, w)? else {
                continue;
            };
            if seen.insert(code.id) {
                trace!(unit = %method.name, code = code.id, world = w, "emitting");
                let emitted = frontend.emit(&code, w)?;
                compiled.push((code, emitted));
            }
        }
        for (code, emitted) in frontend.drain_workqueue(policy)? {
            if seen.insert(code.id) {
                compiled.push((code, emitted));
            }
        }
    }

    let targets = frontend.global_targets();
    let mut target_names = FxHashSet::default();
    for name in &targets {
        if !target_names.insert(name.as_str()) {
            return Err(NativeError::DuplicateGlobal { name: name.clone() });
        }
    }

    let mut fvars = Vec::new();
    let mut unit_map = Vec::with_capacity(compiled.len());
    for (code, emitted) in compiled {
        let EmittedCode {
            module: fragment,
            function_object,
            spec_function_object,
        } = emitted;
        let func_src = fragment_function(&fragment, &function_object);
        let spec_src = spec_function_object
            .as_deref()
            .map(|name| (name, fragment_function(&fragment, name)));
        let map = link_in(&mut module, fragment)?;

        let func_id = match function_object.as_str() {
            FPTR_ARGS => -1,
            FPTR_SPARAM => -2,
            name => push_fvar(&mut fvars, linked(&map, name, func_src)?),
        };
        let spec_id = match spec_src {
            Some((name, src)) => push_fvar(&mut fvars, linked(&map, name, src)?),
            None => 0,
        };
        trace!(code = code.id, func_id, spec_id, "linked");
        unit_map.push((code.id, func_id, spec_id));
    }

    let mut gvars = Vec::with_capacity(targets.len());
    for name in &targets {
        let id = module
            .lookup(name)
            .filter(|&id| module[id].as_data().is_some_and(|d| d.init.is_some()))
            .ok_or_else(|| NativeError::InvalidGlobal { name: name.clone() })?;
        let global = &mut module[id];
        global.linkage = Linkage::Internal;
        global.dso_local = true;
        gvars.push(id);
    }

    if policy == CompilationPolicy::Default {
        for id in module.ids() {
            let global = &mut module[id];
            if global.is_declaration() || global.is_alias() {
                continue;
            }
            global.linkage = Linkage::Internal;
            global.dso_local = true;
            let safe = make_safe_name(&global.name);
            if safe != global.name {
                module.set_name(id, &safe);
            }
        }
    }

    emit_markers(&mut module, &ExportTable::new(fvars.clone(), gvars.clone()));
    debug!(
        module = %module.name,
        fvars = fvars.len(),
        gvars = gvars.len(),
        units = unit_map.len(),
        "created native module"
    );
    Ok(NativeCode {
        module,
        fvars,
        gvars,
        unit_map,
    })
}
