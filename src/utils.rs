use super::{PrepError, registration::EccMatchParameters};
use opencv::core::{Mat, MatTrait, MatTraitConst};
use opencv::imgcodecs;
use std::path::{Path, PathBuf};
use std::{fs, io};

/// Extension trait for more ergonomic Mat conversions
pub trait MatExt {
    /// Convert matrix to specified type with scaling
    ///
    /// # Arguments
    /// * `rtype` - OpenCV type constant (e.g., CV_32F, CV_8U)
    fn convert(&self, rtype: i32, alpha: f64, beta: f64) -> Result<Mat, PrepError>;
}

impl MatExt for Mat {
    fn convert(&self, rtype: i32, alpha: f64, beta: f64) -> Result<Mat, PrepError> {
        let mut dst = Mat::default();
        self.convert_to(&mut dst, rtype, alpha, beta)?;
        Ok(dst)
    }
}

/// A q&d hack allowing `opencv::Mat` objects to be `Sync`.
/// Only use this on immutable `Mat` objects.
pub(crate) struct UnsafeMatSyncWrapper(pub(crate) Mat);
unsafe impl Sync for UnsafeMatSyncWrapper {}

/// Trait for setting value in a 2d Mat<T>
pub trait SetMValue {
    fn set_2d<T: opencv::prelude::DataType>(
        &mut self,
        row: i32,
        col: i32,
        value: T,
    ) -> Result<(), PrepError>;
}

impl SetMValue for Mat {
    #[inline]
    /// ```
    /// # use ometiff_prep::{utils::SetMValue, opencv::prelude::*};
    /// let mut m = opencv::core::Mat::zeros(1, 3, opencv::core::CV_64FC1).unwrap().to_mat().unwrap();
    /// m.set_2d::<f64>(0, 0, -1.0).unwrap();
    /// m.set_2d::<f64>(0, 2, -3.0).unwrap();
    /// assert_eq!(-1.0, *m.at_2d::<f64>(0,0).unwrap());
    /// assert_eq!(0.0, *m.at_2d::<f64>(0,1).unwrap());
    /// assert_eq!(-3.0, *m.at_2d::<f64>(0,2).unwrap());
    /// ```
    fn set_2d<T: opencv::prelude::DataType>(
        &mut self,
        row: i32,
        col: i32,
        value: T,
    ) -> Result<(), PrepError> {
        let v = self.at_2d_mut::<T>(row, col)?;
        *v = value;
        Ok(())
    }
}

/// OpenCV wants `&str` paths, this rejects paths that are not valid Unicode.
pub fn path_str(path: &Path) -> Result<&str, PrepError> {
    path.to_str()
        .ok_or_else(|| PrepError::InvalidPathEncoding(path.to_path_buf()))
}

/// Safe wrapper around OpenCV's `imreadmulti`, returning every page of a
/// multi-page image file (e.g. a TIFF hyperstack) in file order.
///
/// # Errors
/// Returns `PrepError::InvalidPathEncoding` if the path is not valid Unicode,
/// and `PrepError::InputError` if OpenCV could not decode the file.
///
/// # Example
/// ```no_run
/// # use ometiff_prep::{utils::imreadmulti, prelude::*, opencv::imgcodecs};
/// # fn a() -> Result<(), PrepError> {
/// let pages = imreadmulti("stack.ome.tif", imgcodecs::IMREAD_UNCHANGED)?;
/// println!("{} pages", pages.len());
/// # Ok(()) }
/// ```
pub fn imreadmulti<P: AsRef<Path>>(path: P, flags: i32) -> Result<Vec<Mat>, PrepError> {
    let path = path.as_ref();
    let mut pages = opencv::core::Vector::<Mat>::new();
    match imgcodecs::imreadmulti(path_str(path)?, &mut pages, flags) {
        Ok(true) if !pages.is_empty() => Ok(pages.into_iter().collect()),
        Ok(_) => Err(PrepError::InputError(format!(
            "could not decode {}",
            path.display()
        ))),
        Err(e) => Err(PrepError::InputError(format!(
            "could not decode {}: {}",
            path.display(),
            e.message
        ))),
    }
}

/// Writes `contents` next to `path` under a hidden temporary name and renames
/// it into place, so a crash never leaves a half written output behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temporary_path(path)?;
    fs::write(&tmp, contents)
        .and_then(|()| fs::rename(&tmp, path))
        .inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
}

fn temporary_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".partial");
    Ok(path.with_file_name(tmp_name))
}

impl From<EccMatchParameters> for Result<opencv::core::TermCriteria, PrepError> {
    /// Converts from a `EccMatchParameters` to TermCriteria.
    /// The iteration count is always part of the criteria.
    /// ```
    /// # use ometiff_prep::{prelude::*, opencv::core::TermCriteria_Type};
    /// let t: Result<opencv::core::TermCriteria, PrepError> = EccMatchParameters {
    ///     max_count: 50,
    ///     epsilon: Some(0.1),
    ///     ..Default::default()
    /// }.into();
    /// let t = t.unwrap();
    /// assert_eq!(t.epsilon, 0.1);
    /// assert_eq!(t.max_count, 50);
    /// assert_eq!(
    ///     t.typ,
    ///     TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32
    /// );
    /// ```
    fn from(r: EccMatchParameters) -> Result<opencv::core::TermCriteria, PrepError> {
        let mut rv = opencv::core::TermCriteria::default()?;
        rv.typ = opencv::core::TermCriteria_Type::COUNT as i32;
        rv.max_count = r.max_count;
        if let Some(epsilon) = r.epsilon {
            rv.typ |= opencv::core::TermCriteria_Type::EPS as i32;
            rv.epsilon = epsilon;
        }
        Ok(rv)
    }
}
