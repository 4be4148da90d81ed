//! Built-in type tree string table
//!
//! Type tree string offsets with the high bit set index into this table
//! instead of the file's own string buffer.

/// Flag marking an offset into [`COMMON_STRINGS`]
pub const COMMON_STRING_FLAG: u32 = 0x8000_0000;

pub const COMMON_STRINGS: &str = concat!(
    "AABB\0AnimationClip\0AnimationCurve\0AnimationState\0Array\0Base\0BitField\0bitset\0",
    "bool\0char\0ColorRGBA\0Component\0data\0deque\0double\0dynamic_array\0",
    "FastPropertyName\0first\0float\0Font\0GameObject\0Generic Mono\0GradientNEW\0GUID\0",
    "GUIStyle\0int\0list\0long long\0map\0Matrix4x4f\0MdFour\0MonoBehaviour\0MonoScript\0",
    "m_ByteSize\0m_Curve\0m_EditorClassIdentifier\0m_EditorHideFlags\0m_Enabled\0",
    "m_ExtensionPtr\0m_GameObject\0m_Index\0m_IsArray\0m_IsStatic\0m_MetaFlag\0m_Name\0",
    "m_ObjectHideFlags\0m_PrefabInternal\0m_PrefabParentObject\0m_Script\0",
    "m_StaticEditorFlags\0m_Type\0m_Version\0Object\0pair\0PPtr<Component>\0",
    "PPtr<GameObject>\0PPtr<Material>\0PPtr<MonoBehaviour>\0PPtr<MonoScript>\0",
    "PPtr<Object>\0PPtr<Prefab>\0PPtr<Sprite>\0PPtr<TextAsset>\0PPtr<Texture>\0",
    "PPtr<Texture2D>\0PPtr<Transform>\0Prefab\0Quaternionf\0Rectf\0RectInt\0RectOffset\0",
    "second\0set\0short\0size\0SInt16\0SInt32\0SInt64\0SInt8\0staticvector\0string\0",
    "TextAsset\0TextMesh\0Texture\0Texture2D\0Transform\0TypelessData\0UInt16\0UInt32\0",
    "UInt64\0UInt8\0unsigned int\0unsigned long long\0unsigned short\0vector\0Vector2f\0",
    "Vector3f\0Vector4f\0m_ScriptingClassIdentifier\0Gradient\0Type*\0int2_storage\0",
    "int3_storage\0BoundsInt\0m_CorrespondingSourceObject\0m_PrefabInstance\0",
    "m_PrefabAsset\0FileSize\0Hash128\0RenderingLayerMask\0",
);

/// Look up the common string starting at `offset`
pub fn common_string(offset: u32) -> Option<&'static str> {
    let rest = COMMON_STRINGS.get(offset as usize..)?;
    let end = rest.find('\0')?;
    Some(&rest[..end])
}

/// Offset of `value` in the common table, if present
pub fn common_offset(value: &str) -> Option<u32> {
    let mut offset = 0usize;
    for entry in COMMON_STRINGS.split('\0') {
        if entry == value && !entry.is_empty() {
            return Some(offset as u32);
        }
        offset += entry.len() + 1;
    }
    None
}
