use super::Id;

/// A point-in-time value read from an observed object whenever the gauge is read.
///
/// The gauge never keeps its object alive: once the object is dropped, the gauge reads `NaN`.
pub struct Gauge {
    id: Id,
    observe: Box<dyn Fn() -> Option<f64> + Send + Sync>,
}

impl Gauge {
    pub(crate) fn new(id: Id, observe: Box<dyn Fn() -> Option<f64> + Send + Sync>) -> Gauge { Gauge { id, observe } }

    pub fn id(&self) -> &Id { &self.id }

    pub fn value(&self) -> f64 { (self.observe)().unwrap_or(std::f64::NAN) }
}
