/// Login name used to scope socket and lock paths, `UNKNOWN` when the
/// environment has nothing to offer.
pub fn user_name() -> String {
    if let Ok(user) = std::env::var("USER")
        && !user.is_empty()
    {
        return user;
    }
    nix::unistd::User::from_uid(nix::unistd::geteuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| String::from("UNKNOWN"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_name_is_never_empty() {
        assert!(!user_name().is_empty());
    }
}
