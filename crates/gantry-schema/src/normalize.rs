use crate::manifest::{
    LibraryLinkage, ParsedManifest, ProductDescription, ProductKind, TargetDescription, TargetKind,
};

/// File name marking a pre-target package layout: a C-style module map next
/// to the manifest.
pub const MODULE_MAP_FILENAME: &str = "module.modulemap";

/// Convert a legacy system-library package to the target-based model.
///
/// A manifest that declares no targets and no products, sitting next to a
/// module-map file, predates the target model: it describes a single system
/// library. Synthesize the equivalent pair — one automatic-linkage library
/// product and one system target, both named after the package, carrying the
/// manifest's pkg-config name and providers.
///
/// The filesystem check for the module map is the caller's; it arrives here
/// as `has_module_map`. A manifest that declares any target or product is
/// returned untouched. This is the only mutation path in the load pipeline
/// and runs once, before validation.
pub fn normalize_legacy_system_module(
    mut parsed: ParsedManifest,
    has_module_map: bool,
) -> ParsedManifest {
    if !parsed.targets.is_empty() || !parsed.products.is_empty() || !has_module_map {
        return parsed;
    }

    parsed.products.push(ProductDescription {
        name: parsed.name.clone(),
        kind: ProductKind::Library {
            linkage: LibraryLinkage::Automatic,
        },
        targets: vec![parsed.name.clone()],
    });
    parsed.targets.push(TargetDescription {
        name: parsed.name.clone(),
        kind: TargetKind::System,
        path: Some(String::new()),
        url: None,
        checksum: None,
        dependencies: Vec::new(),
        pkg_config: parsed.pkg_config.clone(),
        providers: parsed.providers.clone(),
    });
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_evaluator_output;

    #[test]
    fn synthesizes_system_target_and_product() {
        let parsed = parse_evaluator_output(
            r#"{
                "name": "zlib",
                "pkg_config": "zlib",
                "providers": [{"manager": "apt", "packages": ["zlib1g-dev"]}]
            }"#,
        )
        .unwrap();
        let normalized = normalize_legacy_system_module(parsed, true);

        assert_eq!(normalized.targets.len(), 1);
        assert_eq!(normalized.products.len(), 1);

        let target = &normalized.targets[0];
        assert_eq!(target.name, "zlib");
        assert_eq!(target.kind, TargetKind::System);
        assert_eq!(target.pkg_config.as_deref(), Some("zlib"));
        assert_eq!(target.providers.len(), 1);

        let product = &normalized.products[0];
        assert_eq!(product.name, "zlib");
        assert_eq!(
            product.kind,
            ProductKind::Library {
                linkage: LibraryLinkage::Automatic
            }
        );
        assert_eq!(product.targets, vec!["zlib"]);
    }

    #[test]
    fn untouched_without_module_map() {
        let parsed = parse_evaluator_output(r#"{"name": "zlib"}"#).unwrap();
        let normalized = normalize_legacy_system_module(parsed, false);
        assert!(normalized.targets.is_empty());
        assert!(normalized.products.is_empty());
    }

    #[test]
    fn untouched_when_targets_declared() {
        let parsed = parse_evaluator_output(
            r#"{"name": "pkg", "targets": [{"name": "A", "kind": "regular"}]}"#,
        )
        .unwrap();
        let normalized = normalize_legacy_system_module(parsed, true);
        assert_eq!(normalized.targets.len(), 1);
        assert_eq!(normalized.targets[0].kind, TargetKind::Regular);
        assert!(normalized.products.is_empty());
    }

    #[test]
    fn untouched_when_products_declared() {
        let parsed = parse_evaluator_output(
            r#"{"name": "pkg", "products": [{"name": "P", "kind": "executable", "targets": ["A"]}]}"#,
        )
        .unwrap();
        let normalized = normalize_legacy_system_module(parsed, true);
        assert!(normalized.targets.is_empty());
        assert_eq!(normalized.products.len(), 1);
    }
}
