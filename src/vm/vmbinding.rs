use super::{Collection, Scanning};

/// The `VMBinding` trait associates the runtime's implementations of the collaborator traits.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    type VMScanning: Scanning<Self>;
    type VMCollection: Collection<Self>;
}
