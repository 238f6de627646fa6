#![allow(dead_code)]
use std::error::Error;

use ldap3::LdapConnAsync;

pub mod fake;

pub const LDAP_URL: &str = "ldap://localhost:1389";
pub const LDAP_ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
pub const LDAP_ADMIN_PASSWORD: &str = "adminpassword";

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou)).await?.success()?;
	Ok(())
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new(LDAP_URL).await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind(LDAP_ADMIN_DN, LDAP_ADMIN_PASSWORD).await?.success()?;
	Ok(ldap)
}

pub async fn ldap_delete_user(ldap: &mut ldap3::Ldap, uid: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("uid={},ou=users,dc=example,dc=org", uid)).await?.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	uid: &str,
	sn: &str,
	password: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("uid={},ou=users,dc=example,dc=org", uid),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("cn", [uid].into()),
			("sn", [sn].into()),
			("userPassword", [password].into()),
		],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_add_group(
	ldap: &mut ldap3::Ldap,
	cn: &str,
	members: &[&str],
) -> Result<(), Box<dyn Error>> {
	let members: Vec<String> =
		members.iter().map(|uid| format!("uid={},ou=users,dc=example,dc=org", uid)).collect();
	ldap.add(
		&format!("cn={},ou=groups,dc=example,dc=org", cn),
		vec![
			("objectClass", ["groupOfNames"].into()),
			("member", members.iter().map(String::as_str).collect()),
		],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_group(ldap: &mut ldap3::Ldap, cn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou=groups,dc=example,dc=org", cn)).await?.success()?;
	Ok(())
}
