use std::ffi::CString;

use kb_bench::{ExecutionContext, Extraction};

use crate::types::KBExtraction;

/// Opaque context handle that owns the native and reference backends.
#[derive(Debug, Default)]
pub struct KBContext {
    pub execution: ExecutionContext,
}

impl KBContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Opaque handle owning the extraction records of one benchmark run, with
/// C strings for their titles and styles.
#[derive(Debug)]
pub struct KBResults {
    extractions: Vec<Extraction>,
    titles: Vec<CString>,
    styles: Vec<CString>,
}

impl KBResults {
    pub fn new(extractions: Vec<Extraction>) -> Self {
        // Titles and styles are fixed configuration names without NUL bytes.
        let c_string = |s: &str| CString::new(s).unwrap_or_default();
        let titles = extractions.iter().map(|e| c_string(&e.title)).collect();
        let styles = extractions.iter().map(|e| c_string(&e.style)).collect();
        KBResults {
            extractions,
            titles,
            styles,
        }
    }

    pub fn len(&self) -> usize {
        self.extractions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<KBExtraction> {
        let extraction = self.extractions.get(index)?;
        Some(KBExtraction {
            sizes: extraction.sizes.as_ptr(),
            gflops: extraction.gflops.as_ptr(),
            len: extraction.sizes.len(),
            title: self.titles[index].as_ptr(),
            style: self.styles[index].as_ptr(),
        })
    }
}
