//! [`FormatEngine`] on the GDAL library.

use crate::engine::{
    EngineError, FieldInfo, FieldType, FormatEngine, MetadataMap, SubDataset, VectorLayerInfo,
    VectorSource, VectorTranslate,
};
use gdal::cpl::CslStringList;
use gdal::vector::{LayerAccess, OGRFieldType};
use gdal::{Dataset, DatasetOptions, Driver, DriverManager, GdalOpenFlags, Metadata};
use log::debug;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::path::Path;
use std::ptr;

const DEFAULT_DOMAIN: &str = "";
const SUBDATASETS_DOMAIN: &str = "SUBDATASETS";
const DCAP_VECTOR: &str = "DCAP_VECTOR";
const MEMORY_DRIVER: &str = "MEM";
const NETCDF_DRIVER: &str = "netCDF";

/// Reads and converts files through the GDAL library linked into the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalEngine;

impl GdalEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FormatEngine for GdalEngine {
    fn sub_datasets(&self, uri: &str) -> Result<Vec<SubDataset>, EngineError> {
        let dataset = open(uri)?;
        Ok(parse_sub_datasets(&domain_map(
            dataset.metadata_domain(SUBDATASETS_DOMAIN),
        )))
    }

    fn metadata(&self, uri: &str) -> Result<MetadataMap, EngineError> {
        Ok(domain_map(open(uri)?.metadata_domain(DEFAULT_DOMAIN)))
    }

    fn band_metadata(&self, uri: &str, band: u32) -> Result<MetadataMap, EngineError> {
        let dataset = open(uri)?;
        match dataset.rasterband(band as _) {
            Ok(raster_band) => Ok(domain_map(raster_band.metadata_domain(DEFAULT_DOMAIN))),
            Err(e) => {
                debug!("{} has no band {}: {}", uri, band, e);
                Ok(MetadataMap::new())
            }
        }
    }

    fn translate_raster(
        &self,
        src_uri: &str,
        dst: &Path,
        metadata: &MetadataMap,
    ) -> Result<(), EngineError> {
        let write_error = |source| EngineError::Write {
            path: dst.to_path_buf(),
            source,
        };
        let source = open(src_uri)?;
        // Metadata is set on an in-memory copy so the source stays untouched.
        let mut staged = source
            .create_copy(&driver(MEMORY_DRIVER)?, "", &CslStringList::new())
            .map_err(write_error)?;
        for (key, value) in metadata {
            staged
                .set_metadata_item(key, value, DEFAULT_DOMAIN)
                .map_err(write_error)?;
        }
        staged
            .create_copy(&driver(NETCDF_DRIVER)?, dst, &CslStringList::new())
            .map_err(write_error)?;
        debug!("Translated {} to {}", src_uri, dst.display());
        Ok(())
    }

    fn has_vector_driver(&self, name: &str) -> Result<bool, EngineError> {
        Ok(DriverManager::get_driver_by_name(name)
            .ok()
            .is_some_and(|d| d.metadata_item(DCAP_VECTOR, DEFAULT_DOMAIN).is_some()))
    }

    fn open_vector(&self, path: &Path) -> Result<VectorSource, EngineError> {
        Ok(vector_source(&open_vector(path)?))
    }

    fn translate_vector(
        &self,
        src: &Path,
        dst: &Path,
        request: &VectorTranslate,
    ) -> Result<VectorSource, EngineError> {
        let source = open_vector(src)?;
        vector_translate(&source, src, dst, request)?;
        self.open_vector(dst)
    }
}

fn open(uri: &str) -> Result<Dataset, EngineError> {
    Dataset::open(uri).map_err(|source| EngineError::Open {
        uri: uri.to_string(),
        source,
    })
}

fn open_vector(path: &Path) -> Result<Dataset, EngineError> {
    let options = DatasetOptions {
        open_flags: GdalOpenFlags::GDAL_OF_VECTOR,
        ..Default::default()
    };
    Dataset::open_ex(path, options).map_err(|source| EngineError::Open {
        uri: path.display().to_string(),
        source,
    })
}

fn driver(name: &str) -> Result<Driver, EngineError> {
    DriverManager::get_driver_by_name(name)
        .map_err(|source| EngineError::MissingDriver(name.to_string(), source))
}

/// `KEY=VALUE` items of a metadata domain.
fn domain_map(items: Option<Vec<String>>) -> MetadataMap {
    items
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// `SUBDATASET_<n>_NAME` and `SUBDATASET_<n>_DESC` pairs, ordered by `n`.
fn parse_sub_datasets(entries: &MetadataMap) -> Vec<SubDataset> {
    let mut numbered: Vec<(u32, SubDataset)> = entries
        .iter()
        .filter_map(|(key, uri)| {
            let index = key
                .strip_prefix("SUBDATASET_")?
                .strip_suffix("_NAME")?
                .parse()
                .ok()?;
            let description = entries
                .get(&format!("SUBDATASET_{index}_DESC"))
                .cloned()
                .unwrap_or_default();
            Some((index, SubDataset::new(uri.as_str(), description)))
        })
        .collect();
    numbered.sort_by_key(|(index, _)| *index);
    numbered.into_iter().map(|(_, sub)| sub).collect()
}

fn vector_source(dataset: &Dataset) -> VectorSource {
    VectorSource {
        layers: dataset
            .layers()
            .map(|layer| VectorLayerInfo {
                name: layer.name(),
                fields: layer
                    .defn()
                    .fields()
                    .map(|field| FieldInfo::new(field.name(), field_type(field.field_type())))
                    .collect(),
            })
            .collect(),
    }
}

fn field_type(code: OGRFieldType::Type) -> FieldType {
    match code {
        OGRFieldType::OFTInteger => FieldType::Integer,
        OGRFieldType::OFTInteger64 => FieldType::Integer64,
        OGRFieldType::OFTReal => FieldType::Real,
        OGRFieldType::OFTString => FieldType::String,
        OGRFieldType::OFTDate => FieldType::Date,
        OGRFieldType::OFTTime => FieldType::Time,
        OGRFieldType::OFTDateTime => FieldType::DateTime,
        OGRFieldType::OFTBinary => FieldType::Binary,
        OGRFieldType::OFTIntegerList => FieldType::List("IntegerList".to_string()),
        OGRFieldType::OFTInteger64List => FieldType::List("Integer64List".to_string()),
        OGRFieldType::OFTRealList => FieldType::List("RealList".to_string()),
        OGRFieldType::OFTStringList => FieldType::List("StringList".to_string()),
        other => FieldType::Other(other.to_string()),
    }
}

/// Command line style arguments of `GDALVectorTranslate`.
fn translate_args(request: &VectorTranslate) -> Vec<String> {
    let mut args = vec!["-f".to_string(), request.format.clone()];
    for option in &request.creation_options {
        args.push("-dsco".to_string());
        args.push(option.clone());
    }
    args.extend(request.options.iter().cloned());
    if let Some(sql) = &request.sql {
        args.push("-sql".to_string());
        args.push(sql.clone());
    }
    args
}

// The gdal crate has no binding for GDALVectorTranslate yet.
fn vector_translate(
    source: &Dataset,
    src: &Path,
    dst: &Path,
    request: &VectorTranslate,
) -> Result<(), EngineError> {
    let failed = |message: String| EngineError::VectorTranslate {
        src: src.to_path_buf(),
        message,
    };

    let mut args = CslStringList::new();
    for arg in translate_args(request) {
        args.add_string(&arg).map_err(|e| failed(e.to_string()))?;
    }
    let c_dst = CString::new(dst.to_string_lossy().as_bytes())
        .map_err(|_| failed(format!("{} contains a NUL byte", dst.display())))?;

    unsafe {
        let options = gdal_sys::GDALVectorTranslateOptionsNew(args.as_ptr(), ptr::null_mut());
        if options.is_null() {
            return Err(failed(last_error_message()));
        }
        let mut sources = [source.c_dataset()];
        let mut usage_error: c_int = 0;
        let translated = gdal_sys::GDALVectorTranslate(
            c_dst.as_ptr(),
            ptr::null_mut(),
            1,
            sources.as_mut_ptr(),
            options,
            &mut usage_error,
        );
        gdal_sys::GDALVectorTranslateOptionsFree(options);
        if translated.is_null() {
            return Err(failed(last_error_message()));
        }
        gdal_sys::GDALClose(translated);
    }
    debug!("Translated {} to {}", src.display(), dst.display());
    Ok(())
}

unsafe fn last_error_message() -> String {
    let message = CStr::from_ptr(gdal_sys::CPLGetLastErrorMsg())
        .to_string_lossy()
        .into_owned();
    gdal_sys::CPLErrorReset();
    message
}
