#![cfg(unix)]

use std::{
    fs,
    io::Cursor,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use gltf::binary::Glb;
use gltf2glb::{
    convert::{CancellationToken, ConvertOptions, SubFormat, TextureFormat},
    document::{KTX2_EXTENSION, parse},
    export::export_glb,
};
use serde_json::json;

/// Shell stand-in for `basisu`: writes `<stem>.<ext>` into `-output_path`
/// containing the stem, and logs the full argument list.
fn install_stub_encoder(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
printf '%s\n' "$*" >> "$(dirname "$0")/invocations.log"
out=""; file=""; ext="basis"
while [ $# -gt 0 ]; do
  case "$1" in
    -ktx2) ext="ktx2"; shift ;;
    -output_path) out="$2"; shift 2 ;;
    -file) file="$2"; shift 2 ;;
    *) shift ;;
  esac
done
name=$(basename "$file")
printf 'KTX:%s' "${name%.*}" > "$out/${name%.*}.$ext"
"#;
    let path = dir.join("basisu");
    fs::write(&path, script).expect("write stub encoder");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod stub encoder");
    path
}

fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbaImage::new(4, 4)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[test]
fn given_gltf_with_shared_textures_when_exporting_to_ktx2_then_every_image_is_converted_once() {
    let assets = tempfile::tempdir().expect("assets dir");
    let tools = tempfile::tempdir().expect("tools dir");
    for name in ["albedo.png", "normal.png", "orm.png"] {
        fs::write(assets.path().join(name), png_bytes()).expect("write texture");
    }
    let input = assets.path().join("scene.gltf");
    fs::write(
        &input,
        json!({
            "asset": { "version": "2.0" },
            "images": [
                { "uri": "albedo.png" },
                { "uri": "normal.png" },
                { "uri": "orm.png" }
            ],
            "textures": [
                { "source": 0 },
                { "source": 1 },
                { "source": 0 },
                { "source": 2 }
            ],
            "materials": [
                {
                    "pbrMetallicRoughness": {
                        "baseColorTexture": { "index": 2 },
                        "metallicRoughnessTexture": { "index": 3 }
                    },
                    "normalTexture": { "index": 1 },
                    "occlusionTexture": { "index": 3 }
                }
            ]
        })
        .to_string(),
    )
    .expect("write gltf");
    let output = assets.path().join("scene.glb");
    let options = ConvertOptions {
        format: TextureFormat::Ktx2,
        sub_format: SubFormat::Uastc,
        encoder_path: Some(install_stub_encoder(tools.path())),
        concurrency_limit: 2,
        ..ConvertOptions::default()
    };

    let report = export_glb(&input, &output, &options, &CancellationToken::new())
        .expect("export should succeed");

    assert_eq!(report.texture_count_before, 4);
    assert_eq!(report.texture_count_after, 3);
    assert_eq!(report.converted_images.len(), 3);
    assert!(report.failed_images.is_empty());

    let invocations = fs::read_to_string(tools.path().join("invocations.log"))
        .expect("encoder should have run");
    let lines: Vec<&str> = invocations.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line.starts_with("-ktx2 -uastc")));
    assert!(lines.iter().any(|line| line.contains("-normal_map") && line.contains("normal.png")));
    assert!(lines.iter().any(|line| line.contains("-linear") && line.contains("orm.png")));

    let bytes = fs::read(&output).expect("read output");
    let glb = Glb::from_slice(&bytes).expect("output should be a GLB");
    let bin = glb.bin.expect("BIN chunk").into_owned();
    let document = parse(&bytes).expect("output should parse");

    assert_eq!(document.extensions_used, vec![KTX2_EXTENSION]);
    assert_eq!(document.extensions_required, vec![KTX2_EXTENSION]);
    assert_eq!(document.textures.len(), 3);
    for (index, expected) in ["albedo", "normal", "orm"].into_iter().enumerate() {
        let image = &document.images[index];
        assert_eq!(image.uri, None);
        assert_eq!(image.mime_type.as_deref(), Some("image/ktx2"));
        let view = &document.buffer_views[image.buffer_view.expect("image view")];
        assert_eq!(view.byte_offset % 4, 0);
        assert_eq!(view.byte_length % 4, 0);
        let start = view.byte_offset as usize;
        let payload = format!("KTX:{expected}");
        assert_eq!(&bin[start..start + payload.len()], payload.as_bytes());
    }

    let material = &document.materials[0];
    let pbr = material.pbr_metallic_roughness.as_ref().expect("pbr block");
    let base = pbr.base_color_texture.as_ref().expect("base color").index;
    assert_eq!(document.texture_image(base), Some(0));
    let normal = material.normal_texture.as_ref().expect("normal").index;
    assert_eq!(document.texture_image(normal), Some(1));

    assert!(assets.path().join("albedo.ktx2").is_file());
}

#[test]
fn given_glb_with_embedded_image_when_exporting_with_conversion_then_payload_is_replaced() {
    let assets = tempfile::tempdir().expect("assets dir");
    let tools = tempfile::tempdir().expect("tools dir");
    fs::write(assets.path().join("albedo.png"), png_bytes()).expect("write texture");
    let gltf_input = assets.path().join("scene.gltf");
    fs::write(
        &gltf_input,
        json!({
            "asset": { "version": "2.0" },
            "images": [{ "uri": "albedo.png" }],
            "textures": [{ "source": 0 }]
        })
        .to_string(),
    )
    .expect("write gltf");

    let packed = assets.path().join("packed.glb");
    let mut keep_png = ConvertOptions::default();
    keep_png.map_toggles.diffuse = false;
    export_glb(&gltf_input, &packed, &keep_png, &CancellationToken::new())
        .expect("packing without conversion should succeed");

    let converted = assets.path().join("converted.glb");
    let options = ConvertOptions {
        encoder_path: Some(install_stub_encoder(tools.path())),
        multithreading: false,
        ..ConvertOptions::default()
    };
    let report = export_glb(&packed, &converted, &options, &CancellationToken::new())
        .expect("export should succeed");

    assert!(report.source_was_glb);
    assert_eq!(report.converted_images.len(), 1);

    let bytes = fs::read(&converted).expect("read output");
    let document = parse(&bytes).expect("output should parse");
    let image = &document.images[0];
    assert_eq!(image.mime_type.as_deref(), Some("image/basis"));
    assert_eq!(image.buffer_view, Some(1));
    assert_eq!(document.texture_image(0), Some(0));
    assert_eq!(document.textures[0].source, None);
}
