//! Extraction of a loaded image into one of the two conventional on-disk
//! layouts, plus generation of a re-packable `image.cfg` catalog.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Local;

use crate::cfg::{Cfg, Group, Variable};
use crate::Result;

use super::ImageFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One `<maintype>_<subtype>` payload per entry plus a `.hdr` sidecar
    /// with the raw file header.
    #[default]
    Unimg,
    /// Recreate the in-image directory tree from the stored filenames.
    Imgrepacker,
}

impl OutputFormat {
    /// Unknown names warn and fall back to the default rather than failing.
    pub fn from_name(name: &str) -> OutputFormat {
        match name {
            "unimg" => OutputFormat::Unimg,
            "imgrepacker" => OutputFormat::Imgrepacker,
            _ => {
                eprintln!("[!] Unknown output format: {}, using default (unimg)", name);
                OutputFormat::Unimg
            }
        }
    }
}

pub struct Unpacker<'a> {
    image: &'a ImageFile,
    /// Path the image was loaded from; recorded in the catalog.
    source_path: String,
    format: OutputFormat,
    verbose: bool,
}

impl<'a> Unpacker<'a> {
    pub fn new(image: &'a ImageFile, source_path: impl Into<String>) -> Self {
        Unpacker {
            image,
            source_path: source_path.into(),
            format: OutputFormat::default(),
            verbose: false,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Write every entry under `outdir` and emit the catalog. An existing
    /// `outdir` is removed first so the extraction is always clean. Any
    /// single write failure aborts the whole operation.
    pub fn unpack<P: AsRef<Path>>(&self, outdir: P) -> Result<()> {
        let outdir = outdir.as_ref();
        if outdir.exists() {
            fs::remove_dir_all(outdir)?;
        }
        fs::create_dir_all(outdir)?;

        let mut catalog_names = Vec::with_capacity(self.image.num_files());
        for (index, entry) in self.image.entries().iter().enumerate() {
            let catalog_name = match self.format {
                OutputFormat::Unimg => {
                    if self.verbose {
                        println!(
                            "Extracting: {} {} ({}, {})",
                            entry.maintype,
                            entry.subtype,
                            entry.original_length,
                            entry.stored_length
                        );
                    }
                    let stem = format!("{}_{}", entry.maintype, entry.subtype);
                    fs::write(
                        outdir.join(format!("{}.hdr", stem)),
                        self.image.file_header_bytes(index),
                    )?;
                    fs::write(outdir.join(&stem), self.image.file_bytes(entry))?;
                    stem
                }
                OutputFormat::Imgrepacker => {
                    if self.verbose {
                        println!("Extracting {}", entry.filename);
                    }
                    let relative = entry.filename.trim_start_matches('/').to_string();
                    let path = outdir.join(&relative);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, self.image.file_bytes(entry))?;
                    relative
                }
            };
            catalog_names.push(catalog_name);
        }

        self.write_catalog(outdir, &catalog_names)?;

        if self.verbose {
            println!("Successfully unpacked image to {}", outdir.display());
        }
        Ok(())
    }

    /// Extract a single named entry into `outdir`, creating intermediate
    /// directories. Returns `Ok(false)` when the image has no such file.
    pub fn extract_file<P: AsRef<Path>>(&self, filename: &str, outdir: P) -> Result<bool> {
        let Some(entry) = self.image.find_by_filename(filename) else {
            return Ok(false);
        };

        let path = outdir.as_ref().join(filename.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.image.file_bytes(entry))?;

        if self.verbose {
            println!("Successfully extracted {} to {}", filename, path.display());
        }
        Ok(true)
    }

    fn build_catalog(&self, catalog_names: &[String]) -> Cfg {
        let mut cfg = Cfg::default();

        let mut dir_def = Group::new("DIR_DEF");
        dir_def.push(Variable::string("INPUT_DIR", "../"));
        cfg.add_group(dir_def);

        let mut filelist = Group::new("FILELIST");
        for (name, entry) in catalog_names.iter().zip(self.image.entries()) {
            filelist.push(Variable::list(vec![
                Variable::string("filename", name.clone()),
                Variable::string("maintype", entry.maintype.clone()),
                Variable::string("subtype", entry.subtype.clone()),
            ]));
        }
        cfg.add_group(filelist);

        let mut image_cfg = Group::new("IMAGE_CFG");
        image_cfg.push(Variable::number("version", self.image.header().version));
        image_cfg.push(Variable::number("pid", self.image.pid()));
        image_cfg.push(Variable::number("vid", self.image.vid()));
        image_cfg.push(Variable::number("hardwareid", self.image.hardware_id()));
        image_cfg.push(Variable::number("firmwareid", self.image.firmware_id()));
        image_cfg.push(Variable::reference("imagename", self.source_path.clone()));
        image_cfg.push(Variable::reference("filelist", "FILELIST"));
        image_cfg.push(Variable::reference(
            "encrypt",
            if self.image.is_encrypted() { "1" } else { "0" },
        ));
        cfg.add_group(image_cfg);

        cfg
    }

    fn write_catalog(&self, outdir: &Path, catalog_names: &[String]) -> Result<()> {
        let cfg = self.build_catalog(catalog_names);

        let banner =
            ";/**************************************************************************/";
        let mut file = File::create(outdir.join("image.cfg"))?;
        writeln!(file, "{}", banner)?;
        writeln!(file, "; {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "; generated by OpenixIMG")?;
        writeln!(file, "; {}", self.source_path)?;
        writeln!(file, "{}", banner)?;
        file.write_all(cfg.dump_to_string().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{build_image, TestFile};
    use super::super::{ImageFile, LoadOptions, HEADER_VERSION_V1, IMAGEWTY_VERSION};
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("awimg_unpack_{}_{}", tag, std::process::id()))
    }

    fn sample_image() -> ImageFile {
        let data = build_image(
            HEADER_VERSION_V1,
            &[
                TestFile::new("/boot.fex", "RFSFAT16", "BOOT", b"boot payload".to_vec()),
                TestFile::new(
                    "/subdir/cfg.fex",
                    "COMMON",
                    "SYS_CONFIG",
                    vec![0x11; 600],
                ),
            ],
        );
        ImageFile::load(data, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn unimg_layout_roundtrip() {
        let image = sample_image();
        let outdir = temp_dir("unimg");
        Unpacker::new(&image, "firmware.img")
            .with_format(OutputFormat::Unimg)
            .unpack(&outdir)
            .unwrap();

        for (index, entry) in image.entries().iter().enumerate() {
            let stem = format!("{}_{}", entry.maintype, entry.subtype);
            let payload = std::fs::read(outdir.join(&stem)).unwrap();
            assert_eq!(payload, image.file_bytes(entry));

            let header = std::fs::read(outdir.join(format!("{}.hdr", stem))).unwrap();
            assert_eq!(header, image.file_header_bytes(index));
        }

        let catalog = Cfg::load_from_file(outdir.join("image.cfg")).unwrap();
        assert_eq!(catalog.count_variables("FILELIST"), 2);
        assert_eq!(
            catalog.get_number_in("version", "IMAGE_CFG"),
            Some(IMAGEWTY_VERSION)
        );
        assert_eq!(
            catalog
                .find_variable_in("filelist", "IMAGE_CFG")
                .unwrap()
                .as_reference(),
            Some("FILELIST")
        );
        let first = catalog.find_group("FILELIST").unwrap().variables[0]
            .items()
            .unwrap();
        assert_eq!(first[0].as_str(), Some("RFSFAT16_BOOT"));

        std::fs::remove_dir_all(&outdir).unwrap();
    }

    #[test]
    fn imgrepacker_layout_roundtrip() {
        let image = sample_image();
        let outdir = temp_dir("imgrepacker");
        Unpacker::new(&image, "firmware.img")
            .with_format(OutputFormat::Imgrepacker)
            .unpack(&outdir)
            .unwrap();

        let boot = std::fs::read(outdir.join("boot.fex")).unwrap();
        assert_eq!(boot, b"boot payload");
        let nested = std::fs::read(outdir.join("subdir/cfg.fex")).unwrap();
        assert_eq!(nested, vec![0x11; 600]);

        let catalog = Cfg::load_from_file(outdir.join("image.cfg")).unwrap();
        let first = catalog.find_group("FILELIST").unwrap().variables[0]
            .items()
            .unwrap();
        // catalog names drop the leading slash
        assert_eq!(first[0].as_str(), Some("boot.fex"));

        std::fs::remove_dir_all(&outdir).unwrap();
    }

    #[test]
    fn unpack_replaces_stale_output() {
        let image = sample_image();
        let outdir = temp_dir("stale");
        std::fs::create_dir_all(&outdir).unwrap();
        std::fs::write(outdir.join("leftover.bin"), b"old").unwrap();

        Unpacker::new(&image, "firmware.img").unpack(&outdir).unwrap();

        assert!(!outdir.join("leftover.bin").exists());
        assert!(outdir.join("image.cfg").exists());

        std::fs::remove_dir_all(&outdir).unwrap();
    }

    #[test]
    fn extract_single_file() {
        let image = sample_image();
        let outdir = temp_dir("single");

        let unpacker = Unpacker::new(&image, "firmware.img");
        assert!(unpacker.extract_file("/subdir/cfg.fex", &outdir).unwrap());
        let nested = std::fs::read(outdir.join("subdir/cfg.fex")).unwrap();
        assert_eq!(nested, vec![0x11; 600]);

        assert!(!unpacker.extract_file("/missing.fex", &outdir).unwrap());

        std::fs::remove_dir_all(&outdir).unwrap();
    }

    #[test]
    fn catalog_records_encryption_state() {
        let image = sample_image();
        let unpacker = Unpacker::new(&image, "firmware.img");
        let cfg = unpacker.build_catalog(&["a".into(), "b".into()]);
        assert_eq!(
            cfg.find_variable_in("encrypt", "IMAGE_CFG").unwrap().as_reference(),
            Some("0")
        );
        assert_eq!(
            cfg.find_variable_in("imagename", "IMAGE_CFG")
                .unwrap()
                .as_reference(),
            Some("firmware.img")
        );
        assert_eq!(cfg.get_number_in("pid", "IMAGE_CFG"), Some(0x1234));
    }

    #[test]
    fn unknown_format_name_falls_back() {
        assert_eq!(OutputFormat::from_name("unimg"), OutputFormat::Unimg);
        assert_eq!(
            OutputFormat::from_name("imgrepacker"),
            OutputFormat::Imgrepacker
        );
        assert_eq!(OutputFormat::from_name("bogus"), OutputFormat::Unimg);
    }
}
