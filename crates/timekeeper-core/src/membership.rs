// Ordered address set
// Used for the controller's membership and the leader's peer list

use timekeeper_api::Address;

/// A set of addresses that remembers insertion order.
///
/// Election scans candidates in this order, so the oldest surviving member
/// is always offered leadership first. Sizes are bounded by the wire limit
/// (16), so linear lookups are fine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberSet {
    members: Vec<Address>,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `address`; returns false if it was already present
    pub fn insert(&mut self, address: Address) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.members.push(address);
        true
    }

    /// Remove `address`; returns false if it was not present
    pub fn remove(&mut self, address: &Address) -> bool {
        let before = self.members.len();
        self.members.retain(|member| member != address);
        self.members.len() != before
    }

    /// Remove every address in `addresses`
    pub fn remove_all<'a>(&mut self, addresses: impl IntoIterator<Item = &'a Address>) {
        for address in addresses {
            self.remove(address);
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.iter().any(|member| member == address)
    }

    pub fn first(&self) -> Option<&Address> {
        self.members.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Address> {
        self.members.clone()
    }
}

impl FromIterator<Address> for MemberSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Address> for MemberSet {
    fn extend<I: IntoIterator<Item = Address>>(&mut self, iter: I) {
        for address in iter {
            self.insert(address);
        }
    }
}
