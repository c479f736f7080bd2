use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Writes a small PNG for every distinct image id and a `captions.txt`
/// manifest listing `rows` under `dir`.
pub(crate) fn write_fixture(dir: &Path, rows: &[(&str, &str)]) -> PathBuf {
    let mut manifest = String::from("image,caption\n");
    for (idx, (image_id, caption)) in rows.iter().enumerate() {
        let path = dir.join(image_id);
        if !path.exists() {
            let shade = (40 * idx % 256) as u8;
            RgbImage::from_pixel(40, 30, Rgb([shade, 128, 255 - shade]))
                .save(&path)
                .unwrap();
        }
        manifest.push_str(&format!("{},{}\n", image_id, caption));
    }

    let manifest_path = dir.join("captions.txt");
    std::fs::write(&manifest_path, manifest).unwrap();
    manifest_path
}
