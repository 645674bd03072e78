//! The ACPI namespace: a tree of four-character name segments with objects
//! hanging off it. Every entry is tagged with the `OwnerId` of whatever
//! loaded or invoked it, so an entire table (or the transient nodes of a
//! method invocation) can be removed in one sweep.

use crate::{object::ObjectRef, AmlError};
use alloc::{borrow::ToOwned, collections::btree_map::BTreeMap, string::String, vec, vec::Vec};
use core::{fmt, str, str::FromStr};

/// Tags namespace entries with their creator: a loaded table or a single
/// method invocation. Used for bulk teardown.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OwnerId(pub u32);

impl OwnerId {
    /// Owns the root scope and the predefined scopes beneath it. Never
    /// deleted.
    pub const ROOT: OwnerId = OwnerId(0);
}

pub struct Namespace {
    root: NamespaceLevel,
}

impl Namespace {
    pub fn new() -> Namespace {
        let mut namespace = Namespace { root: NamespaceLevel::new(LevelKind::Scope, OwnerId::ROOT) };
        /*
         * Create the predefined scopes from §5.3.1 of the ACPI spec.
         */
        for scope in ["\\_GPE", "\\_SB_", "\\_SI_", "\\_TZ_", "\\_PR_"] {
            namespace
                .add_level(AmlName::from_str(scope).unwrap(), LevelKind::Scope, OwnerId::ROOT)
                .unwrap();
        }
        namespace
    }

    /// Add a level to the namespace, for things that hold further names
    /// beneath them (scopes, devices, and friends). Adding a level that
    /// already exists is not an error - `Scope` re-opens existing scopes all
    /// the time - and does not change the existing level's kind or owner.
    pub fn add_level(&mut self, path: AmlName, kind: LevelKind, owner: OwnerId) -> Result<(), AmlError> {
        assert!(path.is_absolute());
        let path = path.normalize()?;

        if path != AmlName::root() {
            let (level, last_seg) = {
                let (last_seg, parent_path) = path.split_last()?;
                (self.get_level_mut(&parent_path)?, last_seg)
            };
            level.children.entry(last_seg).or_insert_with(|| NamespaceLevel::new(kind, owner));
        }
        Ok(())
    }

    /// Insert an object at `path`, which must be absolute and normalized. The
    /// parent level must already exist.
    pub fn insert(&mut self, path: AmlName, object: ObjectRef, owner: OwnerId) -> Result<(), AmlError> {
        assert!(path.is_absolute());
        let path = path.normalize()?;

        let (level, last_seg) = {
            let (last_seg, parent_path) = path.split_last()?;
            (self.get_level_mut(&parent_path)?, last_seg)
        };
        if level.values.contains_key(&last_seg) {
            return Err(AmlError::NameCollision(path));
        }
        level.values.insert(last_seg, NamespaceEntry { object, owner });
        Ok(())
    }

    pub fn get(&self, path: &AmlName) -> Result<ObjectRef, AmlError> {
        let (last_seg, parent_path) = path.split_last()?;
        let level = self.get_level(&parent_path)?;
        match level.values.get(&last_seg) {
            Some(entry) => Ok(entry.object.clone()),
            None => Err(AmlError::ObjectDoesNotExist(path.clone())),
        }
    }

    /// Resolve `path` against `starting_scope`, applying the §5.3 search
    /// rules: a single-segment relative name is looked for in the starting
    /// scope, then in each parent scope up to the root. Returns the absolute
    /// name the object was found at, as well as the object.
    pub fn search(&self, path: &AmlName, starting_scope: &AmlName) -> Result<(AmlName, ObjectRef), AmlError> {
        if path.search_rules_apply() {
            let mut scope = starting_scope.clone();
            assert!(scope.is_absolute());

            loop {
                let candidate = path.resolve(&scope)?;
                if let Ok(object) = self.get(&candidate) {
                    return Ok((candidate, object));
                }
                if scope == AmlName::root() {
                    return Err(AmlError::ObjectDoesNotExist(path.clone()));
                }
                scope = scope.parent()?;
            }
        } else {
            let name = path.resolve(starting_scope)?;
            let object = self.get(&name)?;
            Ok((name, object))
        }
    }

    /// Remove every value and (emptied) level created by `owner`. Levels
    /// owned by `owner` that still contain foreign entries are kept and
    /// logged, rather than taking the foreign entries down with them.
    pub fn delete_by_owner(&mut self, owner: OwnerId) {
        let removed = Self::delete_by_owner_in(&mut self.root, owner, &AmlName::root());
        if removed > 0 {
            log::debug!("Removed {} namespace entries for {:?}", removed, owner);
        }
    }

    fn delete_by_owner_in(level: &mut NamespaceLevel, owner: OwnerId, path: &AmlName) -> usize {
        let mut removed = 0;

        let before = level.values.len();
        level.values.retain(|_, entry| entry.owner != owner);
        removed += before - level.values.len();

        for (seg, child) in level.children.iter_mut() {
            let child_path = AmlName::from_name_seg(*seg).resolve(path).unwrap();
            removed += Self::delete_by_owner_in(child, owner, &child_path);
        }
        level.children.retain(|seg, child| {
            if child.owner != owner {
                return true;
            }
            if child.children.is_empty() && child.values.is_empty() {
                removed += 1;
                false
            } else {
                log::warn!(
                    "Level {}.{} is owned by {:?} but still holds entries from other owners; keeping it",
                    path,
                    seg.as_str(),
                    owner
                );
                true
            }
        });

        removed
    }

    /// Visit values in the subtree under `start`, shallowest first.
    /// `max_depth` counts name segments below `start` (`Some(1)` visits only
    /// direct children). The callback returns whether to descend into the
    /// level a value of kind device-like opened.
    pub fn walk<F>(&self, start: &AmlName, max_depth: Option<usize>, f: &mut F) -> Result<(), AmlError>
    where
        F: FnMut(&AmlName, &ObjectRef) -> Result<bool, AmlError>,
    {
        let level = self.get_level(start)?;
        self.walk_level(level, start, max_depth, f)
    }

    fn walk_level<F>(
        &self,
        level: &NamespaceLevel,
        path: &AmlName,
        max_depth: Option<usize>,
        f: &mut F,
    ) -> Result<(), AmlError>
    where
        F: FnMut(&AmlName, &ObjectRef) -> Result<bool, AmlError>,
    {
        if max_depth == Some(0) {
            return Ok(());
        }
        let next_depth = max_depth.map(|depth| depth - 1);

        for (seg, entry) in level.values.iter() {
            let value_path = AmlName::from_name_seg(*seg).resolve(path)?;
            let descend = f(&value_path, &entry.object)?;
            if descend {
                if let Some(child) = level.children.get(seg) {
                    self.walk_level(child, &value_path, next_depth, f)?;
                }
            }
        }
        /*
         * Levels without an associated value (plain scopes) are always
         * descended into - they aren't nodes the callback can veto.
         */
        for (seg, child) in level.children.iter() {
            if level.values.contains_key(seg) {
                continue;
            }
            let child_path = AmlName::from_name_seg(*seg).resolve(path)?;
            self.walk_level(child, &child_path, next_depth, f)?;
        }
        Ok(())
    }

    pub(crate) fn level_kind(&self, path: &AmlName) -> Result<LevelKind, AmlError> {
        Ok(self.get_level(path)?.kind)
    }

    /// The owner that created the value entry at `path`.
    pub(crate) fn owner_of(&self, path: &AmlName) -> Result<OwnerId, AmlError> {
        let (last_seg, parent_path) = path.split_last()?;
        match self.get_level(&parent_path)?.values.get(&last_seg) {
            Some(entry) => Ok(entry.owner),
            None => Err(AmlError::ObjectDoesNotExist(path.clone())),
        }
    }

    fn get_level(&self, path: &AmlName) -> Result<&NamespaceLevel, AmlError> {
        assert!(path.is_absolute());
        let mut level = &self.root;
        for (i, seg) in path.0.iter().filter_map(NameComponent::as_segment).enumerate() {
            level = level.children.get(&seg).ok_or_else(|| {
                AmlError::LevelDoesNotExist(AmlName(path.0[..=(i + 1)].to_owned()))
            })?;
        }
        Ok(level)
    }

    fn get_level_mut(&mut self, path: &AmlName) -> Result<&mut NamespaceLevel, AmlError> {
        assert!(path.is_absolute());
        let mut level = &mut self.root;
        for (i, seg) in path.0.iter().filter_map(NameComponent::as_segment).enumerate() {
            level = level.children.get_mut(&seg).ok_or_else(|| {
                AmlError::LevelDoesNotExist(AmlName(path.0[..=(i + 1)].to_owned()))
            })?;
        }
        Ok(level)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn print_level(
            level: &NamespaceLevel,
            f: &mut fmt::Formatter<'_>,
            name: &str,
            indent: usize,
        ) -> fmt::Result {
            writeln!(f, "{:indent$}{}:", "", name, indent = indent)?;
            for (seg, entry) in level.values.iter() {
                writeln!(
                    f,
                    "{:indent$}{}: {:?}",
                    "",
                    seg.as_str(),
                    entry.object.lock(),
                    indent = indent + 2
                )?;
            }
            for (seg, child) in level.children.iter() {
                print_level(child, f, seg.as_str(), indent + 2)?;
            }
            Ok(())
        }

        print_level(&self.root, f, "\\", 0)
    }
}

#[derive(Clone, Debug)]
pub struct NamespaceLevel {
    pub kind: LevelKind,
    pub owner: OwnerId,
    pub children: BTreeMap<NameSeg, NamespaceLevel>,
    pub values: BTreeMap<NameSeg, NamespaceEntry>,
}

impl NamespaceLevel {
    pub(crate) fn new(kind: LevelKind, owner: OwnerId) -> NamespaceLevel {
        NamespaceLevel { kind, owner, children: BTreeMap::new(), values: BTreeMap::new() }
    }
}

#[derive(Clone, Debug)]
pub struct NamespaceEntry {
    pub object: ObjectRef,
    pub owner: OwnerId,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LevelKind {
    Scope,
    Device,
    Processor,
    PowerResource,
    ThermalZone,
    /// A level created to hold named objects a method creates while it runs.
    MethodLocals,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AmlName(pub(crate) Vec<NameComponent>);

impl AmlName {
    pub fn root() -> AmlName {
        AmlName(vec![NameComponent::Root])
    }

    pub fn from_name_seg(seg: NameSeg) -> AmlName {
        AmlName(vec![NameComponent::Segment(seg)])
    }

    pub fn from_components(components: Vec<NameComponent>) -> AmlName {
        assert!(!components.is_empty());
        AmlName(components)
    }

    pub fn as_string(&self) -> String {
        self.0
            .iter()
            .fold(String::new(), |name, component| match component {
                NameComponent::Root => name + "\\",
                NameComponent::Prefix => name + "^",
                NameComponent::Segment(seg) if name.is_empty() || name.ends_with(['\\', '^']) => {
                    name + seg.as_str()
                }
                NameComponent::Segment(seg) => name + "." + seg.as_str(),
            })
    }

    /// An absolute name starts at the root of the namespace.
    pub fn is_absolute(&self) -> bool {
        self.0.first() == Some(&NameComponent::Root)
    }

    /// A normal name does not contain any prefix (`^`) components.
    pub fn is_normal(&self) -> bool {
        !self.0.contains(&NameComponent::Prefix)
    }

    pub fn is_root(&self) -> bool {
        self.0 == [NameComponent::Root]
    }

    /// Whether the §5.3 upward search rules apply when resolving this name:
    /// they do only for names made of a single segment.
    pub fn search_rules_apply(&self) -> bool {
        matches!(self.0.as_slice(), [NameComponent::Segment(_)])
    }

    /// Remove prefix components by cancelling them against the segments
    /// before them. Fails on names that try to escape above the root.
    pub fn normalize(self) -> Result<AmlName, AmlError> {
        if self.is_normal() {
            return Ok(self);
        }

        let mut normalized: Vec<NameComponent> = Vec::with_capacity(self.0.len());
        for component in self.0.iter() {
            match component {
                NameComponent::Prefix => match normalized.pop() {
                    Some(NameComponent::Segment(_)) => (),
                    _ => return Err(AmlError::InvalidNormalizedName(self.clone())),
                },
                component => normalized.push(*component),
            }
        }
        Ok(AmlName(normalized))
    }

    /// Resolve this name against a scope, making it absolute. The scope must
    /// be absolute and normal.
    pub fn resolve(&self, scope: &AmlName) -> Result<AmlName, AmlError> {
        assert!(scope.is_absolute());
        assert!(scope.is_normal());

        if self.is_absolute() {
            return self.clone().normalize();
        }

        let mut resolved = scope.clone();
        resolved.0.extend_from_slice(&self.0);
        resolved.normalize()
    }

    /// The parent scope of this name, e.g. `\_SB_.PCI0.PRT0 -> \_SB_.PCI0`.
    pub fn parent(&self) -> Result<AmlName, AmlError> {
        assert!(self.is_absolute());
        assert!(self.is_normal());
        if self.is_root() {
            return Err(AmlError::RootHasNoParent);
        }
        Ok(AmlName(self.0[..self.0.len() - 1].to_owned()))
    }

    fn split_last(&self) -> Result<(NameSeg, AmlName), AmlError> {
        assert!(self.is_absolute());
        assert!(self.is_normal());
        match self.0.last() {
            Some(NameComponent::Segment(seg)) => Ok((*seg, self.parent()?)),
            _ => Err(AmlError::InvalidName(self.clone())),
        }
    }
}

impl FromStr for AmlName {
    type Err = AmlError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        if string.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }

        let mut components = Vec::new();
        let mut rest = string;
        if let Some(stripped) = rest.strip_prefix('\\') {
            components.push(NameComponent::Root);
            rest = stripped;
        } else {
            while let Some(stripped) = rest.strip_prefix('^') {
                components.push(NameComponent::Prefix);
                rest = stripped;
            }
        }

        if !rest.is_empty() {
            for part in rest.split('.') {
                components.push(NameComponent::Segment(NameSeg::from_str(part)?));
            }
        }

        if components.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }
        Ok(AmlName(components))
    }
}

impl fmt::Display for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl fmt::Debug for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum NameComponent {
    Root,
    Prefix,
    Segment(NameSeg),
}

impl NameComponent {
    pub fn as_segment(&self) -> Option<NameSeg> {
        match self {
            NameComponent::Segment(seg) => Some(*seg),
            NameComponent::Root | NameComponent::Prefix => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameSeg(pub(crate) [u8; 4]);

impl NameSeg {
    /// Construct a `NameSeg` from its 4-byte AML encoding, validating the
    /// character set.
    pub fn from_bytes(bytes: [u8; 4]) -> Result<NameSeg, AmlError> {
        if !is_lead_name_char(bytes[0])
            || !bytes[1..].iter().all(|&byte| is_name_char(byte))
        {
            return Err(AmlError::InvalidNameSeg(bytes));
        }
        Ok(NameSeg(bytes))
    }

    /// Construct a `NameSeg` from an ASL-style string, padding with `_` if
    /// shorter than 4 characters.
    pub fn from_str(string: &str) -> Result<NameSeg, AmlError> {
        let bytes = string.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(AmlError::InvalidNameSeg([0; 4]));
        }
        let mut seg = [b'_'; 4];
        seg[..bytes.len()].copy_from_slice(bytes);
        NameSeg::from_bytes(seg)
    }

    pub fn as_str(&self) -> &str {
        // Safe: construction validated every byte as ASCII
        unsafe { str::from_utf8_unchecked(&self.0) }
    }
}

impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

fn is_lead_name_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte == b'_'
}

fn is_name_char(byte: u8) -> bool {
    is_lead_name_char(byte) || byte.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use alloc::sync::Arc;

    #[test]
    fn test_aml_name_from_str() {
        assert_eq!(AmlName::from_str(""), Err(AmlError::EmptyNamesAreInvalid));
        assert_eq!(AmlName::from_str("\\"), Ok(AmlName::root()));
        assert_eq!(
            AmlName::from_str("\\_SB_.PCI0"),
            Ok(AmlName(vec![
                NameComponent::Root,
                NameComponent::Segment(NameSeg([b'_', b'S', b'B', b'_'])),
                NameComponent::Segment(NameSeg([b'P', b'C', b'I', b'0']))
            ]))
        );
        assert_eq!(
            AmlName::from_str("\\_SB_.^^^PCI0"),
            Ok(AmlName(vec![
                NameComponent::Root,
                NameComponent::Segment(NameSeg([b'_', b'S', b'B', b'_'])),
                NameComponent::Prefix,
                NameComponent::Prefix,
                NameComponent::Prefix,
                NameComponent::Segment(NameSeg([b'P', b'C', b'I', b'0']))
            ]))
        );
    }

    #[test]
    fn test_is_normal() {
        assert!(AmlName::root().is_normal());
        assert!(AmlName::from_str("\\_SB_.PCI0.VGA_").unwrap().is_normal());
        assert!(!AmlName::from_str("\\_SB_.PCI0.^VGA_").unwrap().is_normal());
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            AmlName::from_str("\\_SB_.^PCI0").unwrap().normalize(),
            Ok(AmlName::from_str("\\PCI0").unwrap())
        );
        assert_eq!(
            AmlName::from_str("\\_SB_.PCI0.^^FOO_").unwrap().normalize(),
            Ok(AmlName::from_str("\\FOO_").unwrap())
        );
        assert!(AmlName::from_str("\\^FOO_").unwrap().normalize().is_err());
    }

    #[test]
    fn test_resolving() {
        let scope = AmlName::from_str("\\_SB_.PCI0").unwrap();
        assert_eq!(
            AmlName::from_str("VGA_").unwrap().resolve(&scope),
            Ok(AmlName::from_str("\\_SB_.PCI0.VGA_").unwrap())
        );
        assert_eq!(
            AmlName::from_str("^VGA_").unwrap().resolve(&scope),
            Ok(AmlName::from_str("\\_SB_.VGA_").unwrap())
        );
        assert_eq!(
            AmlName::from_str("\\FOO_").unwrap().resolve(&scope),
            Ok(AmlName::from_str("\\FOO_").unwrap())
        );
    }

    #[test]
    fn test_parent() {
        assert_eq!(AmlName::root().parent(), Err(AmlError::RootHasNoParent));
        assert_eq!(
            AmlName::from_str("\\_SB_.PCI0").unwrap().parent(),
            Ok(AmlName::from_str("\\_SB_").unwrap())
        );
    }

    #[test]
    fn test_search_rules_apply() {
        assert!(AmlName::from_str("_CRS").unwrap().search_rules_apply());
        assert!(!AmlName::from_str("\\_CRS").unwrap().search_rules_apply());
        assert!(!AmlName::from_str("^_CRS").unwrap().search_rules_apply());
        assert!(!AmlName::from_str("_SB_._CRS").unwrap().search_rules_apply());
    }

    #[test]
    fn test_insert_and_get() {
        let mut namespace = Namespace::new();
        let owner = OwnerId(1);
        let path = AmlName::from_str("\\_SB_.FOO_").unwrap();
        namespace.insert(path.clone(), Object::Integer(42).wrap(), owner).unwrap();

        let object = namespace.get(&path).unwrap();
        assert!(matches!(*object.lock(), Object::Integer(42)));

        // Looking the same path up again returns the same entry
        assert!(Arc::ptr_eq(&object, &namespace.get(&path).unwrap()));

        // Collisions are refused
        assert_eq!(
            namespace.insert(path.clone(), Object::Integer(0).wrap(), owner),
            Err(AmlError::NameCollision(path))
        );

        // Inserting below a level that doesn't exist fails
        assert!(matches!(
            namespace.insert(AmlName::from_str("\\_SB_.NOPE.FOO_").unwrap(), Object::Integer(0).wrap(), owner),
            Err(AmlError::LevelDoesNotExist(_))
        ));
    }

    #[test]
    fn test_upward_search() {
        let mut namespace = Namespace::new();
        let owner = OwnerId(1);
        namespace
            .add_level(AmlName::from_str("\\_SB_.PCI0").unwrap(), LevelKind::Device, owner)
            .unwrap();
        namespace
            .insert(AmlName::from_str("\\_SB_.FOO_").unwrap(), Object::Integer(1).wrap(), owner)
            .unwrap();

        // A single-segment name searches upwards through parent scopes
        let scope = AmlName::from_str("\\_SB_.PCI0").unwrap();
        let (found_at, object) = namespace.search(&AmlName::from_str("FOO_").unwrap(), &scope).unwrap();
        assert_eq!(found_at, AmlName::from_str("\\_SB_.FOO_").unwrap());
        assert!(matches!(*object.lock(), Object::Integer(1)));

        // Multi-segment names do not
        assert!(matches!(
            namespace.search(&AmlName::from_str("PCI0.FOO_").unwrap(), &scope),
            Err(AmlError::ObjectDoesNotExist(_))
        ));

        assert!(matches!(
            namespace.search(&AmlName::from_str("BAR_").unwrap(), &scope),
            Err(AmlError::ObjectDoesNotExist(_))
        ));
    }

    #[test]
    fn test_delete_by_owner() {
        let mut namespace = Namespace::new();
        let table_owner = OwnerId(1);
        let method_owner = OwnerId(2);

        namespace
            .add_level(AmlName::from_str("\\_SB_.DEV0").unwrap(), LevelKind::Device, table_owner)
            .unwrap();
        namespace
            .insert(AmlName::from_str("\\_SB_.DEV0._HID").unwrap(), Object::Integer(0xd041).wrap(), table_owner)
            .unwrap();
        namespace
            .insert(AmlName::from_str("\\_SB_.DEV0.TMP_").unwrap(), Object::Integer(7).wrap(), method_owner)
            .unwrap();

        namespace.delete_by_owner(method_owner);
        assert!(namespace.get(&AmlName::from_str("\\_SB_.DEV0.TMP_").unwrap()).is_err());
        assert!(namespace.get(&AmlName::from_str("\\_SB_.DEV0._HID").unwrap()).is_ok());

        namespace.delete_by_owner(table_owner);
        assert!(namespace.get(&AmlName::from_str("\\_SB_.DEV0._HID").unwrap()).is_err());
        assert!(namespace.get_level(&AmlName::from_str("\\_SB_.DEV0").unwrap()).is_err());
        // Predefined scopes survive
        assert!(namespace.get_level(&AmlName::from_str("\\_SB_").unwrap()).is_ok());
    }

    #[test]
    fn test_walk_depth_limit() {
        let mut namespace = Namespace::new();
        let owner = OwnerId(1);
        namespace.add_level(AmlName::from_str("\\_SB_.DEV0").unwrap(), LevelKind::Device, owner).unwrap();
        namespace
            .insert(AmlName::from_str("\\_SB_.DEV0").unwrap(), Object::Device.wrap(), owner)
            .unwrap();
        namespace
            .insert(AmlName::from_str("\\_SB_.DEV0._HID").unwrap(), Object::Integer(1).wrap(), owner)
            .unwrap();

        let mut seen = Vec::new();
        namespace
            .walk(&AmlName::from_str("\\_SB_").unwrap(), Some(1), &mut |path, _object| {
                seen.push(path.clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![AmlName::from_str("\\_SB_.DEV0").unwrap()]);

        let mut seen = Vec::new();
        namespace
            .walk(&AmlName::from_str("\\_SB_").unwrap(), None, &mut |path, _object| {
                seen.push(path.clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![AmlName::from_str("\\_SB_.DEV0").unwrap(), AmlName::from_str("\\_SB_.DEV0._HID").unwrap()]
        );
    }
}
