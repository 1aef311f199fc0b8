//! Access to the binary companion file. The file starts with a 16 byte
//! unique identifier, everything after that is raw numeric arrays addressed
//! by byte offset and element count from the metadata catalog.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use num_traits::Float;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::catalog::{ArraySlice, ValueType};
use crate::error::EngineError;

const CHECKSUM_BLOCK_SIZE: usize = 2048;

/// A numeric element type that can be memory-mapped straight out of the
/// binary file and converted to the `f64` the signal pipeline runs on.
pub trait IbdValue: Pod + Copy + Send + Sync + 'static {
    const TYPE: ValueType;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_ibd_value {
    ($t:ty, $vt:expr) => {
        impl IbdValue for $t {
            const TYPE: ValueType = $vt;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    };
}

impl_ibd_value!(f32, ValueType::Float32);
impl_ibd_value!(f64, ValueType::Float64);
impl_ibd_value!(i32, ValueType::Int32);
impl_ibd_value!(i64, ValueType::Int64);

/// Element types usable for a mass axis.
pub trait MassValue: IbdValue + Float {}

impl MassValue for f32 {}
impl MassValue for f64 {}

/// Element types the processing stage accepts for intensities. Integer
/// encoded intensities are readable through [`IbdValue`] but are rejected
/// when an engine is constructed over them.
pub trait IntensityValue: IbdValue + Float {}

impl IntensityValue for f32 {}
impl IntensityValue for f64 {}

/// One open handle on a binary companion file. Worker threads each open
/// their own so reads never contend on a shared seek position.
#[derive(Debug)]
pub struct IbdFile {
    path: PathBuf,
    handle: BufReader<File>,
}

impl IbdFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let handle = BufReader::new(File::open(path)?);
        Ok(Self {
            path: path.to_path_buf(),
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The unique identifier stored in the first 16 bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid, EngineError> {
        self.handle.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; 16];
        self.handle.read_exact(&mut bytes)?;
        Ok(Uuid::from_bytes(bytes))
    }

    /// Read one external array into a freshly allocated buffer.
    pub fn read_slice<T: IbdValue>(&mut self, slice: ArraySlice) -> Result<Vec<T>, EngineError> {
        let mut buffer = Vec::new();
        self.read_slice_into(slice, &mut buffer)?;
        Ok(buffer)
    }

    /// Read one external array into `buffer`, reusing its allocation.
    pub fn read_slice_into<T: IbdValue>(
        &mut self,
        slice: ArraySlice,
        buffer: &mut Vec<T>,
    ) -> Result<(), EngineError> {
        buffer.resize(slice.length as usize, T::zeroed());
        if slice.length == 0 {
            return Ok(());
        }
        self.handle.seek(SeekFrom::Start(slice.offset))?;
        self.handle.read_exact(bytemuck::cast_slice_mut(buffer))?;
        Ok(())
    }

    /// SHA-1 of the whole file, identifier bytes included, as lowercase hex.
    pub fn checksum(&mut self) -> Result<String, EngineError> {
        self.handle.seek(SeekFrom::Start(0))?;
        let mut context = Sha1::new();
        let mut block = [0u8; CHECKSUM_BLOCK_SIZE];
        loop {
            let n = self.handle.read(&mut block)?;
            if n == 0 {
                break;
            }
            context.update(&block[..n]);
        }
        Ok(base16ct::lower::encode_string(&context.finalize()))
    }
}
