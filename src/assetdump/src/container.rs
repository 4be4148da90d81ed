//! Container table walking
//!
//! `AssetBundle` and `ResourceManager` objects both carry an `m_Container`
//! map of `pair { first: path, second: … }` rows. In an AssetBundle,
//! `second` is an `AssetInfo` whose `asset` member is the reference; in a
//! ResourceManager, `second` is the reference itself.

use assetdump_unity::{Field, ObjectHandle, ObjectRef, ObjectStore};

use crate::resolve::resolve;
use crate::{Error, Result};

pub const CONTAINER_FIELD: &str = "m_Container";

/// One container row, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub path: String,
    pub reference: ObjectRef,
}

/// Result of walking one owner object's container
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// (path, label) pairs in table order
    pub entries: Vec<(String, String)>,
    /// Rows whose reference could not be resolved
    pub unresolved: usize,
    /// Rows without a usable path or reference
    pub malformed: usize,
    pub container_present: bool,
}

/// Read the container rows of a decoded owner object
///
/// Returns `None` when the object has no `m_Container` field, otherwise the
/// well-formed rows in table order and the number of malformed ones.
pub fn container_entries(owner: &Field) -> Option<(Vec<ContainerEntry>, usize)> {
    let rows = owner.get(CONTAINER_FIELD)?.children();

    let mut entries = Vec::with_capacity(rows.len());
    let mut malformed = 0;
    for row in rows {
        match parse_row(row) {
            Some(entry) => entries.push(entry),
            None => malformed += 1,
        }
    }
    Some((entries, malformed))
}

fn parse_row(row: &Field) -> Option<ContainerEntry> {
    let path = row.get("first")?.as_str()?;
    if path.is_empty() {
        return None;
    }
    let second = row.get("second")?;
    let reference = second
        .get("asset")
        .and_then(Field::as_object_ref)
        .or_else(|| second.as_object_ref())?;
    Some(ContainerEntry {
        path: path.to_string(),
        reference,
    })
}

/// Walk an owner object's container, labelling every row
pub fn extract<S: ObjectStore>(store: &mut S, owner: ObjectHandle) -> Result<Extraction> {
    let field = store.read_object(owner)?;
    let Some((rows, malformed)) = container_entries(&field) else {
        return Ok(Extraction::default());
    };

    let mut extraction = Extraction {
        entries: Vec::with_capacity(rows.len()),
        unresolved: 0,
        malformed,
        container_present: true,
    };

    for row in rows {
        match resolve(store, owner.file, row.reference) {
            Ok(label) => extraction.entries.push((row.path, label)),
            Err(e @ Error::UnresolvableReference { .. }) => {
                tracing::debug!(path = %row.path, error = %e, "skipping container row");
                extraction.unresolved += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::tests::MemoryStore;
    use assetdump_unity::{ClassId, FileId, Value};

    fn asset_info(reference: ObjectRef) -> Field {
        Field::structure(
            "second",
            "AssetInfo",
            vec![
                Field::int("preloadIndex", 0),
                Field::int("preloadSize", 0),
                Field::pptr("asset", "Object", reference),
            ],
        )
    }

    fn row(path: &str, second: Field) -> Field {
        Field::structure("data", "pair", vec![Field::string("first", path), second])
    }

    fn owner(type_name: &str, rows: Vec<Field>) -> Field {
        Field::structure(
            "Base",
            type_name,
            vec![
                Field::string("m_Name", "owner"),
                Field::array(CONTAINER_FIELD, "map", rows),
            ],
        )
    }

    #[test]
    fn test_asset_bundle_rows_in_order() {
        let mut store = MemoryStore::default();
        store.plain(0, 10, ClassId::TEXTURE_2D);
        store.plain(0, 11, ClassId::MATERIAL);
        store.insert(
            0,
            1,
            ClassId::ASSET_BUNDLE,
            owner(
                "AssetBundle",
                vec![
                    row("assets/a.png", asset_info(ObjectRef::new(0, 10))),
                    row("assets/b.mat", asset_info(ObjectRef::new(0, 11))),
                ],
            ),
        );

        let extraction = extract(&mut store, ObjectHandle::new(FileId(0), 1)).unwrap();
        assert!(extraction.container_present);
        assert_eq!(
            extraction.entries,
            vec![
                ("assets/a.png".to_string(), "Texture2D".to_string()),
                ("assets/b.mat".to_string(), "Material".to_string()),
            ]
        );
    }

    #[test]
    fn test_resource_manager_rows_reference_directly() {
        let mut store = MemoryStore::default();
        store.plain(0, 5, ClassId::MESH);
        store.insert(
            0,
            1,
            ClassId::RESOURCE_MANAGER,
            owner(
                "ResourceManager",
                vec![
                    row("shared", Field::pptr("second", "Object", ObjectRef::new(0, 5))),
                    row("shared", Field::pptr("second", "Object", ObjectRef::new(0, 5))),
                ],
            ),
        );

        let extraction = extract(&mut store, ObjectHandle::new(FileId(0), 1)).unwrap();
        assert_eq!(extraction.entries.len(), 2);
        assert!(extraction.entries.iter().all(|(p, l)| p == "shared" && l == "Mesh"));
    }

    #[test]
    fn test_bad_rows_are_counted_and_skipped() {
        let mut store = MemoryStore::default();
        store.plain(0, 5, ClassId::SHADER);
        store.insert(
            0,
            1,
            ClassId::ASSET_BUNDLE,
            owner(
                "AssetBundle",
                vec![
                    row("", asset_info(ObjectRef::new(0, 5))),
                    row("assets/missing.asset", asset_info(ObjectRef::new(0, 404))),
                    Field::structure("data", "pair", vec![Field::string("first", "x")]),
                    row("assets/null.asset", asset_info(ObjectRef::new(0, 0))),
                    row("assets/ok.shader", asset_info(ObjectRef::new(0, 5))),
                ],
            ),
        );

        let extraction = extract(&mut store, ObjectHandle::new(FileId(0), 1)).unwrap();
        assert_eq!(extraction.malformed, 2);
        assert_eq!(extraction.unresolved, 2);
        assert_eq!(
            extraction.entries,
            vec![("assets/ok.shader".to_string(), "Shader".to_string())]
        );
    }

    #[test]
    fn test_missing_container_field() {
        let mut store = MemoryStore::default();
        store.insert(
            0,
            1,
            ClassId::ASSET_BUNDLE,
            Field::new("Base", "AssetBundle", Value::Struct(vec![Field::string("m_Name", "b")])),
        );

        let extraction = extract(&mut store, ObjectHandle::new(FileId(0), 1)).unwrap();
        assert!(!extraction.container_present);
        assert!(extraction.entries.is_empty());
    }

    #[test]
    fn test_empty_container_is_present() {
        let field = owner("AssetBundle", vec![]);
        let (entries, malformed) = container_entries(&field).unwrap();
        assert!(entries.is_empty());
        assert_eq!(malformed, 0);
    }
}
