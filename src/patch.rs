//! JSON Patch construction
//!
//! Operations are applied in array order, so a container must be added
//! before anything is added below it. `PatchBuilder` tracks which
//! containers exist in the target object and emits their creation first.

use anyhow::Context as _;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: Op,
    pub path: String,
    pub value: serde_json::Value,
}

/// Ordered list of operations, ready to be sent as `JSONPatch`
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct PatchDocument(Vec<PatchOperation>);

impl PatchDocument {
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Applies the patch to `target`, top to bottom.
    pub fn apply_to(&self, target: &mut serde_json::Value) -> anyhow::Result<()> {
        let patch: json_patch::Patch = serde_json::from_value(serde_json::to_value(self)?)
            .context("patch is not a valid JSON Patch document")?;
        json_patch::patch(target, &patch).context("patch does not apply to the object")?;
        Ok(())
    }
}

/// Shape of the object being patched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectShape {
    pub has_metadata: bool,
    pub has_annotations: bool,
}

impl ObjectShape {
    pub fn of(object: &serde_json::Value) -> Self {
        let metadata = object.get("metadata").filter(|m| m.is_object());
        ObjectShape {
            has_metadata: metadata.is_some(),
            has_annotations: metadata
                .and_then(|m| m.get("annotations"))
                .map_or(false, serde_json::Value::is_object),
        }
    }
}

pub struct PatchBuilder {
    shape: ObjectShape,
    ops: Vec<PatchOperation>,
}

impl PatchBuilder {
    pub fn new(shape: ObjectShape) -> Self {
        PatchBuilder {
            shape,
            ops: Vec::new(),
        }
    }

    fn push(&mut self, path: &str, value: serde_json::Value) {
        self.ops.push(PatchOperation {
            op: Op::Add,
            path: path.to_string(),
            value,
        });
    }

    fn ensure_metadata(&mut self) {
        if !self.shape.has_metadata {
            self.push("/metadata", serde_json::Value::Object(Default::default()));
            self.shape.has_metadata = true;
        }
    }

    /// Sets the whole annotation map. Existing annotations are replaced,
    /// so `annotations` must already contain the keys to keep.
    /// An empty map is not added to an object that has no annotations.
    pub fn annotations(&mut self, annotations: &BTreeMap<String, String>) -> &mut Self {
        if annotations.is_empty() && !self.shape.has_annotations {
            return self;
        }
        self.ensure_metadata();
        let value = annotations
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        self.push("/metadata/annotations", serde_json::Value::Object(value));
        self.shape.has_annotations = true;
        self
    }

    pub fn build(self) -> PatchDocument {
        PatchDocument(self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("purposes".to_string(), "unspecified".to_string());
        m.insert("legalBasis".to_string(), "consent".to_string());
        m
    }

    #[test]
    fn existing_annotations_single_operation() {
        let object = json!({"metadata": {"annotations": {"team": "a"}}});
        let mut builder = PatchBuilder::new(ObjectShape::of(&object));
        let mut annotations = tags();
        annotations.insert("team".to_string(), "a".to_string());
        builder.annotations(&annotations);
        let patch = builder.build();
        assert_eq!(
            String::from_utf8(patch.to_bytes().unwrap()).unwrap(),
            r#"[{"op":"add","path":"/metadata/annotations","value":{"legalBasis":"consent","purposes":"unspecified","team":"a"}}]"#
        );
    }

    #[test]
    fn missing_metadata_is_created_first() {
        let mut object = json!({"kind": "Pod"});
        let shape = ObjectShape::of(&object);
        assert_eq!(
            shape,
            ObjectShape {
                has_metadata: false,
                has_annotations: false
            }
        );
        let mut builder = PatchBuilder::new(shape);
        builder.annotations(&tags());
        let patch = builder.build();
        let paths = patch
            .operations()
            .iter()
            .map(|op| op.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, ["/metadata", "/metadata/annotations"]);

        patch.apply_to(&mut object).unwrap();
        assert_eq!(
            object,
            json!({
                "kind": "Pod",
                "metadata": {"annotations": {"legalBasis": "consent", "purposes": "unspecified"}}
            })
        );
    }

    #[test]
    fn missing_annotations_only() {
        let mut object = json!({"metadata": {"name": "web"}});
        let mut builder = PatchBuilder::new(ObjectShape::of(&object));
        builder.annotations(&tags());
        let patch = builder.build();
        assert_eq!(patch.operations().len(), 1);
        patch.apply_to(&mut object).unwrap();
        assert_eq!(object["metadata"]["name"], "web");
        assert_eq!(object["metadata"]["annotations"]["legalBasis"], "consent");
    }

    #[test]
    fn empty_map_creates_nothing() {
        let mut builder = PatchBuilder::new(ObjectShape::of(&json!({"kind": "Pod"})));
        builder.annotations(&BTreeMap::new());
        assert!(builder.build().is_empty());
    }

    #[test]
    fn empty_map_still_replaces_existing_annotations() {
        let mut object = json!({"metadata": {"annotations": {"team": "a"}}});
        let mut builder = PatchBuilder::new(ObjectShape::of(&object));
        builder.annotations(&BTreeMap::new());
        let patch = builder.build();
        assert_eq!(patch.operations().len(), 1);
        patch.apply_to(&mut object).unwrap();
        assert_eq!(object["metadata"]["annotations"], json!({}));
    }

    #[test]
    fn null_annotations_count_as_missing() {
        let object = json!({"metadata": {"annotations": null}});
        assert!(!ObjectShape::of(&object).has_annotations);
    }

    #[test]
    fn reversed_order_would_not_apply() {
        let mut builder = PatchBuilder::new(ObjectShape::of(&json!({})));
        builder.annotations(&tags());
        let mut ops = builder.build().0;
        ops.reverse();
        let mut object = json!({});
        assert!(PatchDocument(ops).apply_to(&mut object).is_err());
    }
}
