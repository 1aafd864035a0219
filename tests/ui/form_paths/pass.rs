use formwork::{FormPaths, PathNode};
use rust_decimal::Decimal;

#[derive(FormPaths)]
struct Address {
    city: String,
}

#[derive(FormPaths)]
#[form_paths(rename_all = "camelCase")]
struct LoanForm {
    loan_amount: Decimal,
    home_address: Address,
    #[form_paths(rename = "coBorrowerList")]
    co_borrowers: Vec<Address>,
}

fn main() {
    let paths = LoanForm::root();
    assert_eq!(paths.loan_amount().path().to_string(), "loanAmount");
    assert_eq!(paths.home_address().city().path().to_string(), "homeAddress.city");
    assert_eq!(
        paths.co_borrowers().at(1).city().path().to_string(),
        "coBorrowerList[1].city"
    );
}
