//! Object reference → type label
//!
//! Most objects are labelled by their built-in class. `MonoBehaviour`
//! objects take the class name of the `MonoScript` their `m_Script` points
//! at, which needs exactly one more lookup.

use assetdump_unity::{ClassId, Field, FileId, ObjectHandle, ObjectRef, ObjectStore};

use crate::{Error, Result};

/// Label used when a script-backed object's script class cannot be read
pub const SCRIPT_FALLBACK_LABEL: &str = "MonoBehaviour";

/// First step of resolving a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Final label, from the class id alone
    Direct(String),
    /// Script-backed object; the label comes from `script`'s class name
    NeedsScriptLookup {
        owner: ObjectHandle,
        script: ObjectRef,
    },
}

/// Resolve a reference and label it by class
///
/// Fails with [`Error::UnresolvableReference`] when the reference is null or
/// points at an object the store cannot find.
pub fn classify_target<S: ObjectStore>(
    store: &mut S,
    from: FileId,
    reference: ObjectRef,
) -> Result<Resolution> {
    let owner = store
        .resolve(from, reference)
        .map_err(|source| Error::UnresolvableReference { reference, source })?;
    let class_id = store.class_id(owner)?;

    if class_id != ClassId::MONO_BEHAVIOUR {
        return Ok(Resolution::Direct(class_id.label()));
    }

    let script = match store.read_object(owner) {
        Ok(field) => field
            .get("m_Script")
            .and_then(Field::as_object_ref)
            .unwrap_or(ObjectRef::new(0, 0)),
        Err(e) => {
            tracing::debug!(path_id = owner.path_id, error = %e, "unreadable MonoBehaviour");
            ObjectRef::new(0, 0)
        }
    };
    Ok(Resolution::NeedsScriptLookup { owner, script })
}

/// Read the class name of a `MonoScript`, relative to the referencing object's file
pub fn resolve_script<S: ObjectStore>(
    store: &mut S,
    owner: ObjectHandle,
    script: ObjectRef,
) -> Result<String> {
    let handle = store.resolve(owner.file, script)?;
    let field = store.read_object(handle)?;
    match field.get("m_ClassName").and_then(Field::as_str) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::MissingScriptClass(script)),
    }
}

/// Resolve a reference all the way to its display label
///
/// Script lookups that fail fall back to [`SCRIPT_FALLBACK_LABEL`].
pub fn resolve<S: ObjectStore>(store: &mut S, from: FileId, reference: ObjectRef) -> Result<String> {
    match classify_target(store, from, reference)? {
        Resolution::Direct(label) => Ok(label),
        Resolution::NeedsScriptLookup { owner, script } => {
            match resolve_script(store, owner, script) {
                Ok(name) => Ok(name),
                Err(e) => {
                    tracing::debug!(%script, error = %e, "falling back to MonoBehaviour");
                    Ok(SCRIPT_FALLBACK_LABEL.to_string())
                }
            }
        }
    }
}
