use rowguard_addresses::{PhysicalAddress, VirtualAddress};

/// Translates virtual addresses of the current process to physical addresses.
///
/// Implementations decide where the information comes from (`/proc/self/pagemap`,
/// a hypervisor interface, a fixed table in tests, ...).
pub trait Translator {
    /// Size in bytes of one translation unit (the page size).
    fn granularity(&self) -> usize;

    /// Translate `va` to the physical address backing it.
    ///
    /// # Errors
    /// Fails if the page is not resident or the translation is not visible.
    fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, TranslateError>;
}

impl<T: Translator + ?Sized> Translator for &T {
    fn granularity(&self) -> usize {
        (**self).granularity()
    }

    fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, TranslateError> {
        (**self).translate(va)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("failed to read the page map")]
    Io(#[from] std::io::Error),
    #[error("page at {0} is not present")]
    NotPresent(VirtualAddress),
    #[error("page at {0} is swapped out")]
    Swapped(VirtualAddress),
    #[error("physical frame of {0} is hidden (missing CAP_SYS_ADMIN?)")]
    PfnHidden(VirtualAddress),
}
