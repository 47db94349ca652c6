//! Dependency closure computation, per §4.5.

use std::collections::{HashMap, HashSet};

use log::debug;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::index::{PackageRecord, Priority};

/// Packages the resolver pulls in regardless of what the index says,
/// covering the base system and the VM-oriented kernel/init stack.
const EXTRA_SEEDS: [&str; 5] = ["apt", "gpgv", "systemd", "linux-image-virtual", "udev"];

/// Computes the transitive closure of mandatory and seed packages.
///
/// Names with no matching record (including seeds) are skipped silently.
/// The returned order is randomized to spread mirror load across the
/// subsequent download phase; no downstream stage may depend on it.
pub fn resolve_closure(packages_info: &HashMap<String, PackageRecord>) -> Vec<&PackageRecord> {
    let mut required: HashSet<String> = HashSet::new();
    let mut unprocessed: HashSet<String> = packages_info
        .values()
        .filter(|p| p.priority == Priority::Required)
        .map(|p| p.name.clone())
        .collect();
    unprocessed.extend(EXTRA_SEEDS.iter().map(|s| s.to_string()));

    while let Some(name) = unprocessed.iter().next().cloned() {
        unprocessed.remove(&name);

        let Some(info) = packages_info.get(&name) else {
            continue;
        };

        required.insert(name.clone());
        for dep in info.depends.iter().chain(info.pre_depends.iter()) {
            if required.contains(dep) || unprocessed.contains(dep) {
                continue;
            }
            debug!("adding dependency {} from {}", dep, name);
            unprocessed.insert(dep.clone());
        }
    }

    let mut ret: Vec<&PackageRecord> = required
        .iter()
        .filter_map(|name| packages_info.get(name))
        .collect();
    ret.shuffle(&mut thread_rng());

    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MultiArch;

    fn record(name: &str, priority: Priority, depends: &[&str]) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            filename: format!("pool/{}.deb", name),
            version: "1.0".to_string(),
            priority,
            sha256: "0".repeat(64),
            depends: depends.iter().map(|s| s.to_string()).collect(),
            pre_depends: Vec::new(),
            multi_arch: MultiArch::None,
            architecture: "amd64".to_string(),
        }
    }

    #[test]
    fn pulls_in_required_and_transitive_deps() {
        let mut packages = HashMap::new();
        packages.insert("apt".to_string(), record("apt", Priority::Required, &["libc6"]));
        packages.insert("libc6".to_string(), record("libc6", Priority::Optional, &[]));
        packages.insert("unrelated".to_string(), record("unrelated", Priority::Optional, &[]));

        let closure: HashSet<&str> = resolve_closure(&packages)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert!(closure.contains("apt"));
        assert!(closure.contains("libc6"));
        assert!(!closure.contains("unrelated"));
    }

    #[test]
    fn missing_seed_names_are_skipped_silently() {
        // gpgv/systemd/etc aren't in the index at all; resolution still succeeds.
        let packages = HashMap::new();
        assert!(resolve_closure(&packages).is_empty());
    }

    #[test]
    fn each_name_is_added_at_most_once() {
        let mut packages = HashMap::new();
        packages.insert("a".to_string(), record("a", Priority::Required, &["b"]));
        packages.insert("b".to_string(), record("b", Priority::Optional, &["a"]));
        let closure = resolve_closure(&packages);
        assert_eq!(closure.len(), 2);
    }
}
