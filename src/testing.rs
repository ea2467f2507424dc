//! Stand-ins for the external services, shared by unit tests.

use crate::classifier::{Classification, Classifier, Image, Verdict};
use crate::error::{Error, Result, Service};
use crate::geo::{Coordinates, ReverseGeocoder};
use crate::identity::StaticIdentity;
use crate::model::{Identity, WasteCategory};
use crate::registry::ServiceRegistry;
use crate::store::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn identity() -> Identity {
    Identity {
        id: "u-ada".to_string(),
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        avatar: "https://img.example.com/ada.png".to_string(),
    }
}

pub fn accepted(sub_category: &str) -> Verdict {
    Verdict {
        passed: true,
        reason: "Bottle going into bin".to_string(),
        category: Some(WasteCategory::Recyclable),
        sub_category: sub_category.to_string(),
    }
}

pub fn rejected() -> Verdict {
    Verdict {
        passed: false,
        reason: "No clear disposal action".to_string(),
        category: None,
        sub_category: "none".to_string(),
    }
}

/// Returns queued verdicts in order, then the last one forever
pub struct StubClassifier {
    verdicts: Mutex<Vec<Verdict>>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StubClassifier {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StubClassifier {
    fn classify_item(&self, _access_token: &str, _image: &Image) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Unavailable {
                service: Service::Classifier,
                message: "timed out".to_string(),
            });
        }
        Ok(Classification {
            category: WasteCategory::Recyclable,
            sub_category: "plastics".to_string(),
        })
    }

    fn verify_disposal(&self, _access_token: &str, _image: &Image) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Unavailable {
                service: Service::Classifier,
                message: "timed out".to_string(),
            });
        }
        let mut verdicts = self.verdicts.lock().unwrap();
        if verdicts.len() > 1 {
            Ok(verdicts.remove(0))
        } else {
            Ok(verdicts.first().cloned().unwrap_or_else(rejected))
        }
    }
}

pub struct FixedGeocoder(pub Option<String>);

impl ReverseGeocoder for FixedGeocoder {
    fn reverse(&self, _at: Coordinates) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

pub fn registry(store: Arc<MemoryStore>, classifier: Arc<StubClassifier>) -> ServiceRegistry {
    ServiceRegistry::new(
        store.clone(),
        store,
        classifier,
        Arc::new(FixedGeocoder(Some("Taipei".to_string()))),
        Arc::new(StaticIdentity::new(identity())),
    )
}

pub fn position() -> Option<Coordinates> {
    Some(Coordinates {
        latitude: 25.03,
        longitude: 121.56,
    })
}

pub fn image(seed: u8) -> Image {
    Image::from_bytes(vec![0x89, b'P', b'N', b'G', seed]).unwrap()
}
