use std::collections::btree_map;
use std::collections::BTreeMap;

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{DpcError, DpcResult};

/// Named tensors flowing through a [`crate::Problem`].
///
/// Every entry is laid out `(time, batch, feature)`. Static values have a
/// singleton time axis and scalars are `[1, 1, 1]`. Keys are never overwritten:
/// inserting an existing key is a [`DpcError::NameCollision`].
#[derive(Clone, Debug)]
pub struct DataDict<B: Backend> {
    name: String,
    tensors: BTreeMap<String, Tensor<B, 3>>,
}

impl<B: Backend> DataDict<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tensors: BTreeMap::new(),
        }
    }

    pub(crate) fn from_tensors(
        name: impl Into<String>,
        tensors: impl IntoIterator<Item = (String, Tensor<B, 3>)>,
    ) -> Self {
        Self {
            name: name.into(),
            tensors: tensors.into_iter().collect(),
        }
    }

    /// Batch name tag, e.g. `nstep_train` or `loop_dev`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor<B, 3>> {
        self.tensors.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Tensor<B, 3>> {
        self.tensors.get(key)
    }

    /// Look up `key` on behalf of `owner`, failing with a missing-key error naming both.
    pub fn require(&self, owner: &str, key: &str) -> DpcResult<Tensor<B, 3>> {
        self.tensors
            .get(key)
            .cloned()
            .ok_or_else(|| DpcError::missing_key(owner, key))
    }

    pub fn device(&self) -> B::Device {
        self.tensors
            .values()
            .next()
            .map(|tensor| tensor.device())
            .unwrap_or_default()
    }

    pub fn insert(
        &mut self,
        owner: &str,
        key: impl Into<String>,
        tensor: Tensor<B, 3>,
    ) -> DpcResult<()> {
        match self.tensors.entry(key.into()) {
            btree_map::Entry::Occupied(entry) => Err(DpcError::collision(owner, entry.key())),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(tensor);
                Ok(())
            }
        }
    }

    pub fn with(mut self, key: impl Into<String>, tensor: Tensor<B, 3>) -> DpcResult<Self> {
        let owner = self.name.clone();
        self.insert(&owner, key, tensor)?;
        Ok(self)
    }

    /// Merge `other` into `self`. Every key is checked before anything is
    /// inserted, so a collision leaves `self` untouched.
    pub fn merge(&mut self, owner: &str, other: DataDict<B>) -> DpcResult<()> {
        if let Some(key) = other.keys().find(|key| self.contains_key(key)) {
            return Err(DpcError::collision(owner, key));
        }
        self.tensors.extend(other.tensors);
        Ok(())
    }

    /// Prefix every key with the batch name tag: `loss` becomes `nstep_train_loss`.
    pub fn prefixed(self) -> Self {
        let name = self.name;
        let tensors = self
            .tensors
            .into_iter()
            .map(|(key, tensor)| (format!("{name}_{key}"), tensor))
            .collect();
        Self { name, tensors }
    }
}

impl<B: Backend> IntoIterator for DataDict<B> {
    type Item = (String, Tensor<B, 3>);
    type IntoIter = btree_map::IntoIter<String, Tensor<B, 3>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn dict() -> DataDict<TestBackend> {
        DataDict::new("nstep_train")
            .with("Yp", Tensor::zeros([3, 2, 1]))
            .unwrap()
    }

    #[test]
    fn insert_rejects_existing_key() {
        let mut data = dict();
        let err = data
            .insert("estim", "Yp", Tensor::ones([3, 2, 1]))
            .unwrap_err();

        assert_eq!(err, DpcError::collision("estim", "Yp"));
    }

    #[test]
    fn failed_merge_leaves_dict_untouched() {
        let mut data = dict();
        let other = DataDict::new("nstep_train")
            .with("x0", Tensor::zeros([1, 2, 4]))
            .unwrap()
            .with("Yp", Tensor::zeros([3, 2, 1]))
            .unwrap();

        assert!(data.merge("estim", other).is_err());
        assert!(!data.contains_key("x0"));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn prefixed_uses_name_tag() {
        let keys: Vec<String> = dict().prefixed().keys().cloned().collect();
        assert_eq!(keys, vec!["nstep_train_Yp".to_string()]);
    }

    #[test]
    fn require_reports_owner_and_key() {
        let err = dict().require("ref_loss", "Yf").unwrap_err();
        assert_eq!(err, DpcError::missing_key("ref_loss", "Yf"));
    }
}
