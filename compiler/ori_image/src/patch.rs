//! Replacing aliases whose targets leave the module.
//!
//! An alias must point at a definition, so an alias that will not be
//! compiled in this shard cannot simply keep pointing at its (now declared)
//! target. It also cannot be erased right away: its users may sit in bodies
//! that have not been decoded yet, and their uses are invisible until then.
//!
//! The patch runs in two phases:
//!
//! ```text
//! alias ──► stub (fresh definition of the alias's type)
//!     materialize everything
//! stub takes the alias's name, every use of alias ──► stub, erase alias
//! stub loses its body or initializer (becomes a declaration)
//! ```

use ori_lir::{Constant, FunctionBody, GlobalId, GlobalKind, GlobalValue, LazyModule, ValueType};

/// The operations the placeholder patch needs from a module with deferred
/// bodies.
pub trait PlaceholderGraph {
    type Error;

    /// Create an anonymous definition with the value type of `alias` and
    /// point `alias` at it.
    fn redirect_to_placeholder(&mut self, alias: GlobalId) -> GlobalId;

    /// Decode everything, making use lists complete.
    ///
    /// # Errors
    ///
    /// Whatever decoding reports.
    fn materialize_all(&mut self) -> Result<(), Self::Error>;

    /// Move `alias`'s name and uses onto `placeholder` and erase `alias`.
    ///
    /// # Errors
    ///
    /// Fails when use lists are still incomplete.
    fn replace_alias(&mut self, alias: GlobalId, placeholder: GlobalId) -> Result<(), Self::Error>;

    /// Turn the placeholder into a declaration.
    fn strip(&mut self, placeholder: GlobalId);
}

/// Replace each of `aliases` by a declaration of the same name and type.
///
/// Returns the ids of the new declarations, in the order of `aliases`.
///
/// # Errors
///
/// The first error from materialization or use replacement.
pub fn retarget_through_placeholders<G: PlaceholderGraph>(
    graph: &mut G,
    aliases: &[GlobalId],
) -> Result<Vec<GlobalId>, G::Error> {
    let placeholders: Vec<GlobalId> = aliases
        .iter()
        .map(|&alias| graph.redirect_to_placeholder(alias))
        .collect();

    graph.materialize_all()?;

    for (&alias, &placeholder) in aliases.iter().zip(&placeholders) {
        graph.replace_alias(alias, placeholder)?;
        graph.strip(placeholder);
    }
    Ok(placeholders)
}

impl PlaceholderGraph for LazyModule<'_> {
    type Error = ori_lir::CodecError;

    fn redirect_to_placeholder(&mut self, alias: GlobalId) -> GlobalId {
        let module = self.module_mut();
        let stub = match module[alias].value_type() {
            ValueType::Function(ty) => {
                GlobalValue::function("", ty).with_body(FunctionBody::unreachable())
            }
            ValueType::Data(ty) => GlobalValue::data("", ty, Some(Constant::Zero)),
        };
        let stub = module.add(stub);
        if let GlobalKind::Alias(target) = &mut module[alias].kind {
            target.aliasee = stub;
        }
        stub
    }

    fn materialize_all(&mut self) -> Result<(), Self::Error> {
        LazyModule::materialize_all(self)
    }

    fn replace_alias(&mut self, alias: GlobalId, placeholder: GlobalId) -> Result<(), Self::Error> {
        self.module_mut().take_name(placeholder, alias);
        self.replace_all_uses_with(alias, placeholder)?;
        self.erase(alias);
        Ok(())
    }

    fn strip(&mut self, placeholder: GlobalId) {
        self.make_external_declaration(placeholder);
    }
}
