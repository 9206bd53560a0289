//! Cache key construction for every view the client reads, and the reverse
//! mapping used by the transport to turn a key back into request parameters.

use budget_core::{AccountType, CacheKey, FetchError, GoalId, KeyPart, PageRequest, Resource};

pub fn account_balance(name: &str, account_type: AccountType) -> CacheKey {
    CacheKey::new(Resource::AccountBalance, balance_target(name, account_type))
}

/// Target parameters of a balance update; equal to the balance key's parameters.
pub fn balance_target(name: &str, account_type: AccountType) -> Vec<KeyPart> {
    vec![KeyPart::from(name), KeyPart::from(account_type.as_api_str())]
}

pub fn transactions(request: &PageRequest) -> CacheKey {
    CacheKey::new(Resource::Transactions, vec![request.key_part()])
}

pub fn goal(id: GoalId) -> CacheKey {
    CacheKey::new(Resource::Goal, vec![KeyPart::from(id)])
}

pub fn current_email() -> CacheKey {
    CacheKey::of(Resource::CurrentEmail)
}

fn invalid(key: &CacheKey, reason: impl Into<String>) -> FetchError {
    FetchError::InvalidKey {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// `(name, account type)` of an account-balance key.
pub fn balance_params(key: &CacheKey) -> Result<(String, AccountType), FetchError> {
    match key.parts() {
        [KeyPart::Str(name), KeyPart::Str(account_type)] => {
            let account_type = account_type
                .parse::<AccountType>()
                .map_err(|reason| invalid(key, reason))?;
            Ok((name.clone(), account_type))
        }
        _ => Err(invalid(key, "expected account name and account type")),
    }
}

/// Paging parameters of a transactions key.
pub fn page_request(key: &CacheKey) -> Result<PageRequest, FetchError> {
    let [KeyPart::Map(fields)] = key.parts() else {
        return Err(invalid(key, "expected page parameters"));
    };
    let number = |name: &str| match fields.get(name) {
        Some(KeyPart::Int(n)) => {
            u32::try_from(*n).map_err(|_| invalid(key, format!("{} out of range", name)))
        }
        _ => Err(invalid(key, format!("missing {}", name))),
    };
    let sort = match fields.get("sort") {
        Some(KeyPart::Str(sort)) => sort.clone(),
        _ => return Err(invalid(key, "missing sort")),
    };
    Ok(PageRequest::new(number("page")?, number("size")?, sort))
}

pub fn goal_id(key: &CacheKey) -> Result<GoalId, FetchError> {
    match key.parts() {
        [KeyPart::Int(id)] => Ok(*id),
        _ => Err(invalid(key, "expected goal id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_roundtrips_through_key() {
        let request = PageRequest::new(3, 50, "amount,asc");
        assert_eq!(page_request(&transactions(&request)).unwrap(), request);
    }

    #[test]
    fn test_balance_params_roundtrip() {
        let key = account_balance("Everyday", AccountType::Spending);
        assert_eq!(
            balance_params(&key).unwrap(),
            ("Everyday".to_string(), AccountType::Spending)
        );
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        let bare = CacheKey::of(Resource::Transactions);
        assert!(matches!(page_request(&bare), Err(FetchError::InvalidKey { .. })));

        let negative = CacheKey::new(
            Resource::Transactions,
            vec![KeyPart::map([
                ("page", KeyPart::from(-1i64)),
                ("size", KeyPart::from(20i64)),
                ("sort", KeyPart::from("date,desc")),
            ])],
        );
        assert!(page_request(&negative).is_err());

        let bad_type = CacheKey::new(
            Resource::AccountBalance,
            vec![KeyPart::from("Everyday"), KeyPart::from("CHEQUE")],
        );
        assert!(balance_params(&bad_type).is_err());
        assert!(goal_id(&CacheKey::new(Resource::Goal, vec![KeyPart::from("7")])).is_err());
        assert_eq!(goal_id(&goal(7)).unwrap(), 7);
    }
}
