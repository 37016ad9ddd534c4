use crate::asset::Asset;
use crate::engine::Capability;
use crate::error::RunnerError;
use crate::runtime;
use crate::workfile;

/// Check that an asset's declared geometry and formats are consistent
/// and sufficient before any work starts.
///
/// The capability selects which rule set applies: `DistortedOnly`
/// drops every reference-side check. Cheap structural checks run before
/// the transcoder resolution so that a misconfigured asset fails with
/// its own error even on hosts without the tool installed.
pub fn validate(asset: &Asset, capability: Capability) -> Result<(), RunnerError> {
    if asset.target_dimensions().is_none() {
        return Err(RunnerError::Precondition(
            "quality dimensions are not set and cannot be derived from native sizes".to_string(),
        ));
    }

    if capability.considers_reference() {
        ensure_source_exists(asset, true)?;
        ensure_raw_side_has_size(asset, true)?;
    }
    ensure_source_exists(asset, false)?;
    ensure_raw_side_has_size(asset, false)?;

    if capability.considers_reference() {
        if let (Some(ref_fmt), Some(dis_fmt)) =
            (asset.ref_format.pix_fmt(), asset.dis_format.pix_fmt())
        {
            if ref_fmt != dis_fmt {
                return Err(RunnerError::FormatMismatch {
                    reference: ref_fmt.to_string(),
                    distorted: dis_fmt.to_string(),
                });
            }
        }
    }

    // Cropping or padding into a defaulted size would silently produce
    // a geometry nobody asked for.
    if asset.crop.is_some() && !asset.has_explicit_quality() {
        return Err(RunnerError::AmbiguousGeometry("crop"));
    }
    if asset.pad.is_some() && !asset.has_explicit_quality() {
        return Err(RunnerError::AmbiguousGeometry("pad"));
    }

    if workfile::needs_transcode(asset, capability) {
        runtime::resolve_transcoder()?;
    }

    Ok(())
}

fn ensure_source_exists(asset: &Asset, reference: bool) -> Result<(), RunnerError> {
    let (label, path) = if reference {
        ("reference", &asset.ref_path)
    } else {
        ("distorted", &asset.dis_path)
    };
    if !path.exists() {
        return Err(RunnerError::Precondition(format!(
            "{label} path {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

fn ensure_raw_side_has_size(asset: &Asset, reference: bool) -> Result<(), RunnerError> {
    let (label, format, size) = if reference {
        ("reference", &asset.ref_format, asset.ref_size)
    } else {
        ("distorted", &asset.dis_format, asset.dis_size)
    };
    if format.is_raw() && size.is_none() {
        return Err(RunnerError::Precondition(format!(
            "{label} side declares a raw format but no native dimensions"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Dimensions, SourceFormat};
    use std::fs;
    use std::path::Path;

    fn valid_asset(dir: &Path) -> Asset {
        let ref_path = dir.join("src01.yuv");
        let dis_path = dir.join("src01_hrc01.yuv");
        fs::write(&ref_path, b"ref").expect("reference source should be written");
        fs::write(&dis_path, b"dis").expect("distorted source should be written");

        Asset::new(
            ref_path,
            dis_path,
            dir.join("work"),
            SourceFormat::raw("yuv420p"),
            SourceFormat::raw("yuv420p"),
            Some(Dimensions::new(576, 324)),
            Some(Dimensions::new(576, 324)),
            Some(Dimensions::new(576, 324)),
        )
    }

    #[test]
    fn matching_no_op_asset_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let asset = valid_asset(temp.path());
        validate(&asset, Capability::FullPair).expect("no-op asset should validate");
    }

    #[test]
    fn missing_quality_dimensions_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.quality = None;
        asset.ref_size = None;
        asset.dis_size = None;
        asset.ref_format = SourceFormat::Container;
        asset.dis_format = SourceFormat::Container;

        let error = validate(&asset, Capability::FullPair).expect_err("should fail");
        assert!(matches!(error, RunnerError::Precondition(_)));
    }

    #[test]
    fn missing_reference_path_fails_full_pair_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        fs::remove_file(&asset.ref_path).expect("reference source should be removable");
        // Keep the distorted side self-sufficient for the no-reference rule set.
        asset.ref_format = SourceFormat::Container;

        let error = validate(&asset, Capability::FullPair).expect_err("should fail");
        assert!(matches!(error, RunnerError::Precondition(_)));

        validate(&asset, Capability::DistortedOnly)
            .expect("distorted-only rule set should skip the reference side");
    }

    #[test]
    fn disagreeing_raw_formats_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.dis_format = SourceFormat::raw("yuv422p");

        let error = validate(&asset, Capability::FullPair).expect_err("should fail");
        assert!(matches!(error, RunnerError::FormatMismatch { .. }));
    }

    #[test]
    fn disagreeing_raw_formats_allowed_for_distorted_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.ref_format = SourceFormat::raw("yuv444p");
        validate(&asset, Capability::DistortedOnly).expect("reference format is not considered");
    }

    #[test]
    fn container_side_is_exempt_from_format_matching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.ref_format = SourceFormat::Container;
        asset.ref_size = None;
        // A container side forces transcoding, which requires the tool;
        // only assert that the mismatch rule itself does not fire.
        match validate(&asset, Capability::FullPair) {
            Ok(()) | Err(RunnerError::MissingTool(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn crop_without_explicit_quality_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.quality = None;
        asset.crop = Some("320:180:0:0".to_string());

        let error = validate(&asset, Capability::FullPair).expect_err("should fail");
        assert!(matches!(error, RunnerError::AmbiguousGeometry("crop")));
    }

    #[test]
    fn pad_without_explicit_quality_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.quality = None;
        asset.pad = Some("640:360:32:18".to_string());

        let error = validate(&asset, Capability::DistortedOnly).expect_err("should fail");
        assert!(matches!(error, RunnerError::AmbiguousGeometry("pad")));
    }

    #[test]
    fn raw_side_without_native_size_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut asset = valid_asset(temp.path());
        asset.dis_size = None;

        let error = validate(&asset, Capability::FullPair).expect_err("should fail");
        assert!(matches!(error, RunnerError::Precondition(_)));
    }
}
